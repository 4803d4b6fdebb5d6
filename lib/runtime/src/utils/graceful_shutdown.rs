// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Tracks in-flight calls so shutdown can wait for them to drain
pub struct GracefulShutdownTracker {
    active_calls: AtomicUsize,
    drained: Notify,
}

impl std::fmt::Debug for GracefulShutdownTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulShutdownTracker")
            .field("active_calls", &self.active_calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for GracefulShutdownTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdownTracker {
    pub fn new() -> Self {
        Self {
            active_calls: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Register an in-flight call; the call is released when the guard drops.
    pub fn register(self: &Arc<Self>) -> CallGuard {
        let count = self.active_calls.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Call registered, active: {} -> {}", count, count + 1);
        CallGuard {
            tracker: self.clone(),
        }
    }

    fn unregister(&self) {
        let prev = self.active_calls.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!("Call finished, active: {} -> {}", prev, prev - 1);
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn get_count(&self) -> usize {
        self.active_calls.load(Ordering::Acquire)
    }

    pub async fn wait_for_completion(&self) {
        loop {
            // Create the waiter BEFORE checking the condition
            let notified = self.drained.notified();

            let count = self.active_calls.load(Ordering::SeqCst);
            if count == 0 {
                tracing::debug!("All in-flight calls completed");
                break;
            }

            tracing::debug!("Waiting for {} in-flight calls to complete", count);
            notified.await;
        }
    }
}

/// Keeps one call registered with a [`GracefulShutdownTracker`]
#[must_use = "the call is released as soon as the guard is dropped"]
pub struct CallGuard {
    tracker: Arc<GracefulShutdownTracker>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.tracker.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let tracker = Arc::new(GracefulShutdownTracker::new());
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_for_completion())
            .await
            .expect("idle tracker should not block");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_guards_drop() {
        let tracker = Arc::new(GracefulShutdownTracker::new());
        let first = tracker.register();
        let second = tracker.register();
        assert_eq!(tracker.get_count(), 2);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_completion().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(tracker.get_count(), 0);
    }
}
