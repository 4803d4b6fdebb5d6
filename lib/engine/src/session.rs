// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Session bookkeeping and expiry.
//!
//! A session is an opaque tag carried in the `x-gripmock-session` header. Its stubs and
//! recorded calls live until the session has been idle for longer than the configured TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::history::HistoryRecorder;
use crate::stubs::StubStore;

/// Metadata key carrying the session tag, on gRPC calls and admin requests alike.
pub const SESSION_HEADER: &str = "x-gripmock-session";

#[derive(Debug, Default)]
pub struct SessionTracker {
    last_seen: DashMap<String, Instant>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, session: &str) {
        if !session.is_empty() {
            self.last_seen.insert(session.to_string(), Instant::now());
        }
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Removes and returns sessions idle for longer than `ttl` as of `now`.
    pub fn take_expired(&self, ttl: Duration, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .last_seen
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for session in &expired {
            // a call may have refreshed the session since the scan
            self.last_seen
                .remove_if(session, |_, seen| now.saturating_duration_since(*seen) > ttl);
        }
        expired
    }
}

/// Deletes everything owned by expired sessions. Returns the sessions removed.
pub fn collect_expired(
    tracker: &SessionTracker,
    store: &StubStore,
    history: &HistoryRecorder,
    ttl: Duration,
    now: Instant,
) -> Vec<String> {
    let expired = tracker.take_expired(ttl, now);
    for session in &expired {
        let stubs = store.delete_session(session);
        let calls = history.delete_session(session);
        tracing::debug!(session = %session, stubs, calls, "session expired");
    }
    expired
}

/// Runs [`collect_expired`] every `every` until `cancel` fires.
pub async fn run_gc(
    tracker: Arc<SessionTracker>,
    store: Arc<StubStore>,
    history: Arc<HistoryRecorder>,
    every: Duration,
    ttl: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("session GC stopped");
                return;
            }
            _ = ticker.tick() => {
                collect_expired(&tracker, &store, &history, ttl, Instant::now());
            }
        }
    }
}
