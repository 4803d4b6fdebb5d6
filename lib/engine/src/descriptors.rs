// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor Registry
//!
//! Holds the Protocol Buffer descriptors every dynamic handler is built from. Descriptor sets are
//! registered under a name (usually the file they were read from) so they can be removed again;
//! every change rebuilds the [`DescriptorPool`] from the remaining sets. Readers get a cheap
//! snapshot of the pool, so calls that started before a removal finish against the old pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use prost::Message;
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorSet;
use serde::Serialize;

/// File extensions recognised as binary `FileDescriptorSet`s
pub const DESCRIPTOR_SET_EXTENSIONS: &[&str] = &["pb", "binpb", "protoset", "desc"];

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor set {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode descriptor set {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("invalid descriptor set {name}: {source}")]
    Invalid {
        name: String,
        #[source]
        source: prost_reflect::DescriptorError,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub id: String,
    pub name: String,
    pub input: String,
    pub output: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub package: String,
    pub methods: Vec<MethodInfo>,
}

impl From<&MethodDescriptor> for MethodInfo {
    fn from(method: &MethodDescriptor) -> Self {
        Self {
            id: format!("{}/{}", method.parent_service().full_name(), method.name()),
            name: method.name().to_string(),
            input: method.input().full_name().to_string(),
            output: method.output().full_name().to_string(),
            client_streaming: method.is_client_streaming(),
            server_streaming: method.is_server_streaming(),
        }
    }
}

impl From<&ServiceDescriptor> for ServiceInfo {
    fn from(service: &ServiceDescriptor) -> Self {
        Self {
            id: service.full_name().to_string(),
            name: service.name().to_string(),
            package: service.package_name().to_string(),
            methods: service.methods().map(|m| MethodInfo::from(&m)).collect(),
        }
    }
}

#[derive(Default)]
struct Inner {
    sets: Vec<(String, FileDescriptorSet)>,
    pool: DescriptorPool,
}

#[derive(Default)]
pub struct DescriptorRegistry {
    inner: RwLock<Inner>,
    generation: AtomicU64,
}

impl std::fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DescriptorRegistry")
            .field(
                "sets",
                &inner.sets.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("services", &inner.pool.services().count())
            .finish()
    }
}

fn build_pool(sets: &[(String, FileDescriptorSet)]) -> Result<DescriptorPool, DescriptorError> {
    let mut pool = DescriptorPool::new();
    for (name, set) in sets {
        pool.add_file_descriptor_set(set.clone())
            .map_err(|source| DescriptorError::Invalid {
                name: name.clone(),
                source,
            })?;
    }
    Ok(pool)
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a descriptor set under `name`.
    ///
    /// The registry is left untouched when the resulting pool would be invalid.
    pub fn add(&self, name: impl Into<String>, set: FileDescriptorSet) -> Result<(), DescriptorError> {
        let name = name.into();
        let mut inner = self.inner.write();

        let mut sets = inner.sets.clone();
        match sets.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = set,
            None => sets.push((name.clone(), set)),
        }

        inner.pool = build_pool(&sets)?;
        inner.sets = sets;
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(name, services = inner.pool.services().count(), "Descriptor set registered");
        Ok(())
    }

    /// Decode and register a binary `FileDescriptorSet`.
    pub fn add_encoded(&self, name: impl Into<String>, bytes: &[u8]) -> Result<(), DescriptorError> {
        let name = name.into();
        let set = FileDescriptorSet::decode(bytes).map_err(|source| DescriptorError::Decode {
            name: name.clone(),
            source,
        })?;
        self.add(name, set)
    }

    /// Remove a previously registered set; returns `false` when nothing was registered under `name`.
    pub fn remove(&self, name: &str) -> Result<bool, DescriptorError> {
        let mut inner = self.inner.write();
        let before = inner.sets.len();
        let sets: Vec<_> = inner
            .sets
            .iter()
            .filter(|(existing, _)| existing != name)
            .cloned()
            .collect();
        if sets.len() == before {
            return Ok(false);
        }

        inner.pool = build_pool(&sets)?;
        inner.sets = sets;
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(name, "Descriptor set removed");
        Ok(true)
    }

    /// Snapshot of the current pool
    pub fn pool(&self) -> DescriptorPool {
        self.inner.read().pool.clone()
    }

    /// Bumped on every add/remove; lets background loops notice changes cheaply.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Resolve a gRPC request path (`/pkg.Service/Method`).
    pub fn find_method(&self, path: &str) -> Option<MethodDescriptor> {
        let (service, method) = path.strip_prefix('/')?.split_once('/')?;
        self.inner
            .read()
            .pool
            .get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
    }

    /// Look up a service by its full name, falling back to the short name when it is unambiguous.
    pub fn find_service(&self, name: &str) -> Option<ServiceDescriptor> {
        let inner = self.inner.read();
        if let Some(service) = inner.pool.get_service_by_name(name) {
            return Some(service);
        }

        let mut candidates = inner.pool.services().filter(|s| s.name() == name);
        match (candidates.next(), candidates.next()) {
            (Some(service), None) => Some(service),
            _ => None,
        }
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.inner.read().pool.services().collect()
    }

    pub fn service_infos(&self) -> Vec<ServiceInfo> {
        self.services().iter().map(ServiceInfo::from).collect()
    }

    pub fn methods(&self, service: &str) -> Option<Vec<MethodInfo>> {
        self.find_service(service)
            .map(|s| s.methods().map(|m| MethodInfo::from(&m)).collect())
    }

    /// Every file in the pool as one `FileDescriptorSet` (used for server reflection).
    pub fn file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.inner.read().pool.file_descriptor_protos().cloned().collect(),
        }
    }

    pub fn encoded_file_descriptor_set(&self) -> Vec<u8> {
        self.file_descriptor_set().encode_to_vec()
    }

    /// Load one descriptor set file, or every descriptor set file below a directory.
    /// Returns the number of sets registered.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<usize, DescriptorError> {
        let path = path.as_ref();
        let mut files = Vec::new();
        collect_descriptor_files(path, &mut files)?;
        files.sort();

        for file in &files {
            let bytes = std::fs::read(file).map_err(|source| DescriptorError::Io {
                path: file.clone(),
                source,
            })?;
            self.add_encoded(file.display().to_string(), &bytes)?;
            tracing::info!(path = %file.display(), "Loaded descriptor set");
        }
        Ok(files.len())
    }
}

fn collect_descriptor_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), DescriptorError> {
    let io_err = |source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    };

    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }

    for entry in std::fs::read_dir(path).map_err(io_err)? {
        let entry_path = entry.map_err(io_err)?.path();
        if entry_path.is_dir() {
            collect_descriptor_files(&entry_path, out)?;
        } else if entry_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| DESCRIPTOR_SET_EXTENSIONS.contains(&ext))
        {
            out.push(entry_path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn registry() -> DescriptorRegistry {
        let registry = DescriptorRegistry::new();
        registry
            .add("greeter", testing::greeter_file_descriptor_set())
            .unwrap();
        registry
    }

    #[test]
    fn test_find_method_by_path() {
        let registry = registry();
        let method = registry.find_method("/helloworld.Greeter/SayHello").unwrap();
        assert_eq!(method.input().full_name(), "helloworld.HelloRequest");
        assert!(!method.is_client_streaming());

        let chat = registry.find_method("/helloworld.Greeter/Chat").unwrap();
        assert!(chat.is_client_streaming() && chat.is_server_streaming());

        assert!(registry.find_method("/helloworld.Greeter/Missing").is_none());
        assert!(registry.find_method("helloworld.Greeter/SayHello").is_none());
    }

    #[test]
    fn test_find_service_by_short_name() {
        let registry = registry();
        assert_eq!(
            registry.find_service("Greeter").unwrap().full_name(),
            "helloworld.Greeter"
        );
        assert!(registry.find_service("Unknown").is_none());
    }

    #[test]
    fn test_add_and_remove_sets() {
        let registry = registry();
        let generation = registry.generation();
        registry
            .add("inventory", testing::inventory_file_descriptor_set())
            .unwrap();
        assert!(registry.generation() > generation);
        assert_eq!(registry.services().len(), 2);

        let snapshot = registry.pool();
        assert!(registry.remove("inventory").unwrap());
        assert!(!registry.remove("inventory").unwrap());
        assert!(registry.find_service("inventory.Stock").is_none());
        // an earlier snapshot keeps working for calls already in flight
        assert!(snapshot.get_service_by_name("inventory.Stock").is_some());
    }

    #[test]
    fn test_service_infos() {
        let registry = registry();
        let infos = registry.service_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "helloworld.Greeter");
        assert_eq!(infos[0].package, "helloworld");
        let stream = infos[0]
            .methods
            .iter()
            .find(|m| m.name == "StreamHello")
            .unwrap();
        assert!(stream.server_streaming && !stream.client_streaming);
        assert_eq!(stream.id, "helloworld.Greeter/StreamHello");
    }

    #[test]
    fn test_load_path_and_encode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("greeter.pb");
        std::fs::write(&file, testing::greeter_file_descriptor_set().encode_to_vec()).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let registry = DescriptorRegistry::new();
        assert_eq!(registry.load_path(dir.path()).unwrap(), 1);
        assert!(registry.find_service("helloworld.Greeter").is_some());

        let encoded = registry.encoded_file_descriptor_set();
        let decoded = FileDescriptorSet::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded.file.len(), 1);
    }

    #[test]
    fn test_invalid_set_leaves_registry_untouched() {
        let registry = registry();
        let err = registry.add_encoded("garbage", b"\xff\xff\xff").unwrap_err();
        assert!(matches!(err, DescriptorError::Decode { .. }));
        assert_eq!(registry.services().len(), 1);
    }
}
