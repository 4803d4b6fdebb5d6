// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Keeps `grpc.health.v1.Health` in step with the descriptor registry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;

use crate::descriptors::DescriptorRegistry;

pub const HEALTH_SYNC_INTERVAL: Duration = Duration::from_secs(1);

pub struct HealthSync {
    reporter: HealthReporter,
    descriptors: Arc<DescriptorRegistry>,
    published: BTreeSet<String>,
    generation: Option<u64>,
}

impl std::fmt::Debug for HealthSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSync")
            .field("published", &self.published)
            .field("generation", &self.generation)
            .finish()
    }
}

impl HealthSync {
    pub fn new(reporter: HealthReporter, descriptors: Arc<DescriptorRegistry>) -> Self {
        Self {
            reporter,
            descriptors,
            published: BTreeSet::new(),
            generation: None,
        }
    }

    /// Publishes every registered service as `SERVING`, and services removed since the last
    /// pass as `NOT_SERVING`. Returns false when the registry has not changed.
    pub async fn sync(&mut self) -> bool {
        let generation = self.descriptors.generation();
        if self.generation == Some(generation) {
            return false;
        }

        let current: BTreeSet<String> = self
            .descriptors
            .services()
            .iter()
            .map(|service| service.full_name().to_string())
            .collect();
        for removed in self.published.difference(&current) {
            self.reporter
                .set_service_status(removed, ServingStatus::NotServing)
                .await;
        }
        for service in &current {
            self.reporter
                .set_service_status(service, ServingStatus::Serving)
                .await;
        }
        self.reporter
            .set_service_status("", ServingStatus::Serving)
            .await;

        tracing::debug!(services = current.len(), generation, "health statuses published");
        self.published = current;
        self.generation = Some(generation);
        true
    }

    pub async fn run(mut self, every: Duration, cancel: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("health sync stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.sync().await;
                }
            }
        }
    }
}
