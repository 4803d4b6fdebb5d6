// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Append-only log of served calls, used by verification tooling.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::stubs::same_service;

const REDACTED: &str = "[REDACTED]";

/// One served call. Streams record their messages as arrays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub service: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub request: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            session: None,
            request: Value::Null,
            response: Value::Null,
            error: String::new(),
            stub_id: None,
            timestamp: Utc::now(),
        }
    }

    fn size(&self) -> u64 {
        serde_json::to_vec(self).map_or(1024, |bytes| bytes.len() as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub enabled: bool,
    pub redact_keys: Vec<String>,
    /// 0 = unlimited
    pub limit_bytes: u64,
    /// 0 = no truncation
    pub message_max_bytes: u64,
}

#[derive(Debug, Default)]
struct Log {
    calls: VecDeque<(CallRecord, u64)>,
    bytes: u64,
}

#[derive(Debug)]
pub struct HistoryRecorder {
    enabled: bool,
    redact_keys: HashSet<String>,
    limit_bytes: u64,
    message_max_bytes: u64,
    log: RwLock<Log>,
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(HistoryOptions {
            enabled: true,
            ..Default::default()
        })
    }
}

impl HistoryRecorder {
    pub fn new(options: HistoryOptions) -> Self {
        Self {
            enabled: options.enabled,
            redact_keys: options
                .redact_keys
                .iter()
                .filter(|key| !key.is_empty())
                .map(|key| key.to_lowercase())
                .collect(),
            limit_bytes: options.limit_bytes,
            message_max_bytes: options.message_max_bytes,
            log: RwLock::new(Log::default()),
        }
    }

    /// A recorder that drops everything.
    pub fn disabled() -> Self {
        Self::new(HistoryOptions::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, mut call: CallRecord) {
        if !self.enabled {
            return;
        }
        if !self.redact_keys.is_empty() {
            redact(&mut call.request, &self.redact_keys);
            redact(&mut call.response, &self.redact_keys);
        }
        if self.message_max_bytes > 0 {
            truncate(&mut call.request, self.message_max_bytes);
            truncate(&mut call.response, self.message_max_bytes);
        }

        let size = call.size();
        let mut log = self.log.write();
        log.calls.push_back((call, size));
        log.bytes += size;
        while self.limit_bytes > 0 && log.bytes > self.limit_bytes {
            match log.calls.pop_front() {
                Some((_, evicted)) => log.bytes -= evicted,
                None => break,
            }
        }
    }

    pub fn all(&self) -> Vec<CallRecord> {
        self.filter(None, None, None)
    }

    pub fn count(&self) -> usize {
        self.log.read().calls.len()
    }

    pub fn filter_by_method(&self, service: &str, method: &str) -> Vec<CallRecord> {
        self.filter(Some(service), Some(method), None)
    }

    /// Records matching every given criterion. A session also sees session-less records.
    pub fn filter(
        &self,
        service: Option<&str>,
        method: Option<&str>,
        session: Option<&str>,
    ) -> Vec<CallRecord> {
        let log = self.log.read();
        log.calls
            .iter()
            .map(|(call, _)| call)
            .filter(|call| service.is_none_or(|s| same_service(&call.service, s)))
            .filter(|call| method.is_none_or(|m| call.method == m))
            .filter(|call| match (session, call.session.as_deref()) {
                (Some(wanted), Some(own)) => wanted == own,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Drops the records of one session, returning how many were removed.
    pub fn delete_session(&self, session: &str) -> usize {
        let mut log = self.log.write();
        let before = log.calls.len();
        let mut freed = 0;
        log.calls.retain(|(call, size)| {
            let keep = call.session.as_deref() != Some(session);
            if !keep {
                freed += size;
            }
            keep
        });
        log.bytes -= freed;
        before - log.calls.len()
    }

    pub fn clear(&self) {
        let mut log = self.log.write();
        log.calls.clear();
        log.bytes = 0;
    }
}

fn redact(value: &mut Value, keys: &HashSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if keys.contains(&key.to_lowercase()) {
                    *item = json!(REDACTED);
                } else {
                    redact(item, keys);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| redact(item, keys)),
        _ => {}
    }
}

fn truncate(value: &mut Value, max_bytes: u64) {
    if value.is_null() {
        return;
    }
    let too_big = serde_json::to_vec(value).is_ok_and(|bytes| bytes.len() as u64 > max_bytes);
    if too_big {
        *value = json!({"_truncated": true});
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(service: &str, method: &str, session: Option<&str>) -> CallRecord {
        CallRecord {
            session: session.map(str::to_string),
            request: json!({"name": "Alex"}),
            response: json!({"message": "Hi"}),
            ..CallRecord::new(service, method)
        }
    }

    #[test]
    fn test_record_and_query() {
        let history = HistoryRecorder::default();
        history.record(call("helloworld.Greeter", "SayHello", None));
        history.record(call("helloworld.Greeter", "Chat", Some("A")));
        history.record(call("inventory.Stock", "Get", Some("B")));

        assert_eq!(history.count(), 3);
        assert_eq!(history.all()[0].method, "SayHello");
        assert_eq!(history.filter_by_method("helloworld.Greeter", "SayHello").len(), 1);
        assert_eq!(history.filter_by_method("Greeter", "Chat").len(), 1);
        assert_eq!(history.filter(Some("helloworld.Greeter"), None, None).len(), 2);

        // a session sees its own records and the session-less ones
        assert_eq!(history.filter(None, None, Some("A")).len(), 2);
        assert_eq!(history.filter(None, None, Some("B")).len(), 2);

        assert_eq!(history.delete_session("A"), 1);
        assert_eq!(history.count(), 2);
        history.clear();
        assert_eq!(history.count(), 0);
    }

    #[test]
    fn test_disabled_recorder_drops_calls() {
        let history = HistoryRecorder::disabled();
        history.record(call("Greeter", "SayHello", None));
        assert_eq!(history.count(), 0);
        assert!(!history.is_enabled());
    }

    #[test]
    fn test_redaction_is_recursive_and_case_insensitive() {
        let history = HistoryRecorder::new(HistoryOptions {
            enabled: true,
            redact_keys: vec!["Password".to_string(), "token".to_string()],
            ..Default::default()
        });
        let mut record = call("Greeter", "Login", None);
        record.request = json!({"user": "alex", "password": "s3cret", "nested": [{"TOKEN": "abc"}]});
        history.record(record);

        assert_eq!(
            history.all()[0].request,
            json!({"user": "alex", "password": "[REDACTED]", "nested": [{"TOKEN": "[REDACTED]"}]})
        );
    }

    #[test]
    fn test_size_bounds() {
        let history = HistoryRecorder::new(HistoryOptions {
            enabled: true,
            message_max_bytes: 16,
            ..Default::default()
        });
        let mut record = call("Greeter", "SayHello", None);
        record.request = json!({"name": "a rather long name that does not fit"});
        history.record(record);
        let stored = &history.all()[0];
        assert_eq!(stored.request, json!({"_truncated": true}));
        assert_eq!(stored.response, json!({"message": "Hi"}));

        let one = call("Greeter", "SayHello", None).size();
        let bounded = HistoryRecorder::new(HistoryOptions {
            enabled: true,
            limit_bytes: one * 2 + one / 2,
            ..Default::default()
        });
        for _ in 0..5 {
            bounded.record(call("Greeter", "SayHello", None));
        }
        assert_eq!(bounded.count(), 2);
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let mut record = call("Greeter", "SayHello", None);
        record.stub_id = Some(Uuid::nil());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("stubId").is_some());
        assert!(value.get("error").is_none());
        assert!(value.get("session").is_none());
    }
}
