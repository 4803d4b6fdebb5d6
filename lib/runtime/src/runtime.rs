// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [Runtime] owns the process-wide cancellation tokens and the in-flight call tracker.
//!
//! Shutdown runs in three phases:
//! 1. the endpoint token is cancelled, so the gRPC and admin listeners stop accepting work;
//! 2. in-flight calls are given [`Runtime::shutdown_timeout`] to finish;
//! 3. the primary token is cancelled, which stops background loops (stub reload, session GC,
//!    health sync).

use std::sync::Arc;
use std::time::Duration;

use super::utils::{CallGuard, GracefulShutdownTracker};

pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Runtime {
    id: Arc<String>,
    cancellation_token: CancellationToken,
    endpoint_shutdown_token: CancellationToken,
    graceful_shutdown_tracker: Arc<GracefulShutdownTracker>,
    shutdown_timeout: Duration,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Runtime {
    pub fn new(shutdown_timeout: Duration) -> Runtime {
        let cancellation_token = CancellationToken::new();
        // endpoint shutdown token is a child of the main token
        let endpoint_shutdown_token = cancellation_token.child_token();

        Runtime {
            id: Arc::new(uuid::Uuid::new_v4().to_string()),
            cancellation_token,
            endpoint_shutdown_token,
            graceful_shutdown_tracker: Arc::new(GracefulShutdownTracker::new()),
            shutdown_timeout,
        }
    }

    /// Returns the unique identifier for the [`Runtime`]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Access the primary [`CancellationToken`] for the [`Runtime`]
    pub fn primary_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Token for listeners; cancelled first during shutdown.
    pub fn endpoint_token(&self) -> CancellationToken {
        self.endpoint_shutdown_token.clone()
    }

    /// Creates a child [`CancellationToken`] tied to the life-cycle of the primary token.
    /// Background loops use these so they outlive the listeners until calls have drained.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    /// Register one in-flight call
    pub fn call_guard(&self) -> CallGuard {
        self.graceful_shutdown_tracker.register()
    }

    pub fn graceful_shutdown_tracker(&self) -> Arc<GracefulShutdownTracker> {
        self.graceful_shutdown_tracker.clone()
    }

    /// Shuts down the [`Runtime`] and waits until every phase has completed
    pub async fn shutdown(&self) {
        tracing::info!("Runtime shutdown initiated");

        tracing::debug!("Phase 1: Cancelling endpoint shutdown token");
        self.endpoint_shutdown_token.cancel();

        let count = self.graceful_shutdown_tracker.get_count();
        tracing::debug!("Phase 2: Waiting for {count} in-flight calls");
        if count != 0
            && tokio::time::timeout(
                self.shutdown_timeout,
                self.graceful_shutdown_tracker.wait_for_completion(),
            )
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.graceful_shutdown_tracker.get_count(),
                timeout = ?self.shutdown_timeout,
                "In-flight calls did not finish before the shutdown timeout"
            );
        }

        tracing::debug!("Phase 3: Stopping background tasks");
        self.cancellation_token.cancel();
    }

    /// Wait for Ctrl-C or SIGTERM (or for someone else to cancel the runtime), then shut down.
    pub async fn shutdown_on_signal(&self) {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.endpoint_shutdown_token.cancelled() => {}
        }
        self.shutdown().await;
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
