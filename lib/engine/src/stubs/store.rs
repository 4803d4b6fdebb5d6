// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory stub store.
//!
//! All mutation happens under one exclusive lock so a batch is visible to readers either
//! completely or not at all. Every insert (including a replacement) takes a fresh sequence
//! number, which the matcher uses as its final, deterministic tie-break.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{Stub, UsageLimiter};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("invalid stub #{index}: {reason}")]
    Invalid { index: usize, reason: String },
}

/// A stored stub with its insertion sequence.
#[derive(Debug, Clone)]
pub struct StoredStub {
    pub stub: Arc<Stub>,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    stubs: HashMap<Uuid, StoredStub>,
    next_seq: u64,
}

/// Result of narrowing the store to one RPC method.
#[derive(Debug, Default)]
pub struct Candidates {
    pub service_known: bool,
    pub method_known: bool,
    pub stubs: Vec<StoredStub>,
}

#[derive(Debug, Default)]
pub struct StubStore {
    inner: RwLock<Inner>,
    limiter: UsageLimiter,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter(&self) -> &UsageLimiter {
        &self.limiter
    }

    /// Validates and upserts `stubs` as one batch, returning their ids in input order.
    /// Nothing is stored when any stub is invalid.
    pub fn put_many(&self, stubs: Vec<Stub>) -> Result<Vec<Uuid>, StoreError> {
        for (index, stub) in stubs.iter().enumerate() {
            stub.validate()
                .map_err(|reason| StoreError::Invalid { index, reason })?;
        }

        let mut inner = self.inner.write();
        let mut ids = Vec::with_capacity(stubs.len());
        for mut stub in stubs {
            if stub.id.is_nil() {
                stub.id = Uuid::new_v4();
            }
            let id = stub.id;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.stubs.insert(
                id,
                StoredStub {
                    stub: Arc::new(stub),
                    seq,
                },
            );
            self.limiter.track(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Removes the given ids, returning the ids that were present.
    pub fn delete_by_id(&self, ids: &[Uuid]) -> Vec<Uuid> {
        let mut inner = self.inner.write();
        let removed: Vec<Uuid> = ids
            .iter()
            .filter(|id| inner.stubs.remove(id).is_some())
            .copied()
            .collect();
        removed.iter().for_each(|id| self.limiter.forget(*id));
        removed
    }

    /// Removes every stub declared for `service` (full or short name).
    pub fn delete_by_service(&self, service: &str) -> usize {
        self.delete_where(|stub| stub.serves(service))
    }

    /// Removes every stub owned by `session`. Session-less stubs are kept.
    pub fn delete_session(&self, session: &str) -> usize {
        self.delete_where(|stub| stub.session.as_deref() == Some(session))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.stubs.clear();
        self.limiter.clear();
    }

    fn delete_where(&self, predicate: impl Fn(&Stub) -> bool) -> usize {
        let mut inner = self.inner.write();
        let ids: Vec<Uuid> = inner
            .stubs
            .values()
            .filter(|entry| predicate(&entry.stub))
            .map(|entry| entry.stub.id)
            .collect();
        for id in &ids {
            inner.stubs.remove(id);
            self.limiter.forget(*id);
        }
        ids.len()
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<Stub>> {
        self.inner.read().stubs.get(&id).map(|entry| entry.stub.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stubs in insertion order. With a session, only the stubs visible to it.
    pub fn list(&self, session: Option<&str>) -> Vec<Arc<Stub>> {
        self.sorted(|stub| session.is_none_or(|s| stub.visible_to(Some(s))))
    }

    /// Stubs matched at least once.
    pub fn used(&self, session: Option<&str>) -> Vec<Arc<Stub>> {
        self.list(session)
            .into_iter()
            .filter(|stub| self.limiter.count(stub.id) > 0)
            .collect()
    }

    /// Stubs never matched.
    pub fn unused(&self, session: Option<&str>) -> Vec<Arc<Stub>> {
        self.list(session)
            .into_iter()
            .filter(|stub| self.limiter.count(stub.id) == 0)
            .collect()
    }

    fn sorted(&self, predicate: impl Fn(&Stub) -> bool) -> Vec<Arc<Stub>> {
        let inner = self.inner.read();
        let mut entries: Vec<&StoredStub> = inner
            .stubs
            .values()
            .filter(|entry| predicate(&entry.stub))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.stub.clone()).collect()
    }

    /// Stubs for one method visible to `session`, in insertion order.
    /// Exhausted stubs are left in; the matcher owns that decision.
    pub fn candidates(&self, service: &str, method: &str, session: Option<&str>) -> Candidates {
        let inner = self.inner.read();
        let mut candidates = Candidates::default();
        for entry in inner.stubs.values() {
            if !entry.stub.visible_to(session) || !entry.stub.serves(service) {
                continue;
            }
            candidates.service_known = true;
            if entry.stub.method == method {
                candidates.method_known = true;
                candidates.stubs.push(entry.clone());
            }
        }
        candidates.stubs.sort_by_key(|entry| entry.seq);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stub(value: serde_json::Value) -> Stub {
        serde_json::from_value(value).unwrap()
    }

    fn greeter(name: &str) -> Stub {
        stub(json!({
            "service": "helloworld.Greeter",
            "method": "SayHello",
            "input": {"equals": {"name": name}},
            "output": {"data": {"message": format!("Hi {name}")}}
        }))
    }

    #[test]
    fn test_put_many_assigns_ids_and_upserts() {
        let store = StubStore::new();
        let ids = store.put_many(vec![greeter("Alex"), greeter("Bob")]).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !id.is_nil()));
        assert_eq!(store.len(), 2);

        let mut replacement = greeter("Carol");
        replacement.id = ids[0];
        let replaced = store.put_many(vec![replacement]).unwrap();
        assert_eq!(replaced, vec![ids[0]]);
        assert_eq!(store.len(), 2);
        let found = store.find_by_id(ids[0]).unwrap();
        assert_eq!(found.input.equals.as_ref().unwrap()["name"], json!("Carol"));

        // a replacement moves to the end of the insertion order
        let listed: Vec<Uuid> = store.list(None).iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![ids[1], ids[0]]);
    }

    #[test]
    fn test_invalid_batch_is_rejected_whole() {
        let store = StubStore::new();
        let broken = stub(json!({"service": "Greeter", "method": "SayHello", "output": {"data": {}}}));
        let err = store.put_many(vec![greeter("Alex"), broken]).unwrap_err();
        assert!(matches!(err, StoreError::Invalid { index: 1, .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_deletes() {
        let store = StubStore::new();
        let mut other = greeter("Alex");
        other.service = "inventory.Stock".to_string();
        other.method = "Get".to_string();
        let ids = store
            .put_many(vec![greeter("Alex"), greeter("Bob"), other])
            .unwrap();

        assert_eq!(store.delete_by_id(&[ids[0], Uuid::new_v4()]), vec![ids[0]]);
        assert!(store.find_by_id(ids[0]).is_none());

        assert_eq!(store.delete_by_service("Greeter"), 1);
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_replacing_resets_usage() {
        let store = StubStore::new();
        let ids = store.put_many(vec![greeter("Alex")]).unwrap();
        assert_eq!(store.limiter().try_consume(ids[0], 1), Some(1));
        assert_eq!(store.used(None).len(), 1);

        let mut again = greeter("Alex");
        again.id = ids[0];
        store.put_many(vec![again]).unwrap();
        assert_eq!(store.limiter().count(ids[0]), 0);
        assert_eq!(store.unused(None).len(), 1);
    }

    #[test]
    fn test_deleted_stub_cannot_be_consumed() {
        let store = StubStore::new();
        let ids = store.put_many(vec![greeter("Alex")]).unwrap();
        let stale = store.find_by_id(ids[0]).unwrap();
        store.delete_by_id(&ids);

        assert_eq!(store.limiter().try_consume(stale.id, stale.options.times), None);
        assert_eq!(store.limiter().count(stale.id), 0);
    }

    #[test]
    fn test_sessions_partition_visibility() {
        let store = StubStore::new();
        let mut scoped = greeter("Alex");
        scoped.session = Some("A".to_string());
        store.put_many(vec![scoped, greeter("Bob")]).unwrap();

        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.list(Some("A")).len(), 2);
        assert_eq!(store.list(Some("B")).len(), 1);

        assert_eq!(store.candidates("Greeter", "SayHello", Some("A")).stubs.len(), 2);
        assert_eq!(store.candidates("Greeter", "SayHello", Some("B")).stubs.len(), 1);
        assert_eq!(store.candidates("Greeter", "SayHello", None).stubs.len(), 1);

        assert_eq!(store.delete_session("A"), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_candidates_report_unknown_service_and_method() {
        let store = StubStore::new();
        store.put_many(vec![greeter("Alex")]).unwrap();

        let found = store.candidates("helloworld.Greeter", "SayHello", None);
        assert!(found.service_known && found.method_known);

        let missing_method = store.candidates("helloworld.Greeter", "Unknown", None);
        assert!(missing_method.service_known);
        assert!(!missing_method.method_known);

        let missing_service = store.candidates("other.Service", "SayHello", None);
        assert!(!missing_service.service_known);
    }
}
