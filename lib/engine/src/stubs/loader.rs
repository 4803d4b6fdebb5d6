// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stub files: JSON or YAML documents holding one stub or an array of stubs.
//!
//! The loader remembers which ids came from which file, so reloading a file replaces exactly
//! its own stubs and removing a file removes them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{Stub, StoreError, StubStore};

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to store stubs from {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }
}

pub fn is_stub_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Stub files under `roots`, recursively and sorted. Plain file roots are kept as given.
pub fn collect_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();
    for root in roots {
        if root.is_dir() {
            walk(root, &mut files, &mut visited);
        } else if root.is_file() && is_stub_file(root) {
            files.push(root.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Symlinked directories are followed, each real directory at most once.
fn walk(dir: &Path, files: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) {
    match dir.canonicalize() {
        Ok(real) if !visited.insert(real.clone()) => return,
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "cannot resolve stub directory");
            return;
        }
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "cannot read stub directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files, visited);
        } else if is_stub_file(&path) {
            files.push(path);
        }
    }
}

/// Parses one document. YAML goes through `serde_json::Value` so both formats share the
/// same stub deserialization.
pub fn parse_document(text: &str, format: Format) -> Result<Vec<Stub>, String> {
    let value: Value = match format {
        Format::Json => serde_json::from_str(text).map_err(|err| err.to_string())?,
        Format::Yaml => serde_yaml::from_str(text).map_err(|err| err.to_string())?,
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item).map_err(|err| format!("stub #{index}: {err}"))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        single => serde_json::from_value(single)
            .map(|stub| vec![stub])
            .map_err(|err| err.to_string()),
    }
}

pub fn parse_file(path: &Path) -> Result<Vec<Stub>, LoadError> {
    let format = Format::from_path(path).ok_or_else(|| LoadError::Parse {
        path: path.to_path_buf(),
        reason: "unsupported file extension".to_string(),
    })?;
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&text, format).map_err(|reason| LoadError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

#[derive(Debug)]
pub struct StubLoader {
    store: Arc<StubStore>,
    files: Mutex<HashMap<PathBuf, Vec<Uuid>>>,
}

impl StubLoader {
    pub fn new(store: Arc<StubStore>) -> Self {
        Self {
            store,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<StubStore> {
        &self.store
    }

    /// Loads every stub file under `roots`. Broken files are logged and skipped.
    pub fn load_paths(&self, roots: &[PathBuf]) -> usize {
        collect_files(roots)
            .iter()
            .map(|path| match self.load_file(path) {
                Ok(ids) => ids.len(),
                Err(err) => {
                    tracing::error!(error = %err, "failed to load stub file");
                    0
                }
            })
            .sum()
    }

    /// Loads (or reloads) one file, replacing the stubs it produced before.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Uuid>, LoadError> {
        let stubs = parse_file(path)?;
        let ids = self.store.put_many(stubs).map_err(|source| LoadError::Store {
            path: path.to_path_buf(),
            source,
        })?;

        let previous = self.files.lock().insert(path.to_path_buf(), ids.clone());
        if let Some(previous) = previous {
            let current: HashSet<&Uuid> = ids.iter().collect();
            let stale: Vec<Uuid> = previous.into_iter().filter(|id| !current.contains(id)).collect();
            self.store.delete_by_id(&stale);
        }
        tracing::debug!(path = %path.display(), stubs = ids.len(), "stub file loaded");
        Ok(ids)
    }

    /// Deletes the stubs that came from `path`.
    pub fn unload_file(&self, path: &Path) -> usize {
        let Some(ids) = self.files.lock().remove(path) else {
            return 0;
        };
        let removed = self.store.delete_by_id(&ids).len();
        tracing::debug!(path = %path.display(), stubs = removed, "stub file unloaded");
        removed
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.files.lock().keys().cloned().collect();
        files.sort();
        files
    }

    pub fn ids_for(&self, path: &Path) -> Vec<Uuid> {
        self.files.lock().get(path).cloned().unwrap_or_default()
    }
}
