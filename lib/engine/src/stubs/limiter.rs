// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stub usage counters backing `options.times`.
//!
//! Only tracked ids can be consumed. The store tracks an id when the stub is stored and
//! forgets it when the stub is removed, so a match racing a delete cannot bring the counter
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct UsageLimiter {
    counters: DashMap<Uuid, Arc<AtomicU64>>,
}

impl UsageLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting `id` from zero, replacing any previous count.
    pub fn track(&self, id: Uuid) {
        self.counters.insert(id, Arc::default());
    }

    pub fn forget(&self, id: Uuid) {
        self.counters.remove(&id);
    }

    /// Atomically claims one use of `id` and returns the new use count.
    /// `max == 0` is unlimited; `None` once the stub has already been used `max` times or
    /// when `id` is not tracked.
    pub fn try_consume(&self, id: Uuid, max: u64) -> Option<u64> {
        let counter = self.counters.get(&id)?.clone();
        if max == 0 {
            return Some(counter.fetch_add(1, Ordering::AcqRel) + 1);
        }
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < max).then_some(used + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    pub fn is_exhausted(&self, id: Uuid, max: u64) -> bool {
        max > 0 && self.count(id) >= max
    }

    pub fn count(&self, id: Uuid) -> u64 {
        self.counters
            .get(&id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.counters.clear();
    }
}
