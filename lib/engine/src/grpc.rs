// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The gRPC listener: standard health and reflection services in front of the dynamic
//! catch-all that serves every method in the descriptor registry.

use std::sync::Arc;

use anyhow::{Context, Result};
use derive_builder::Builder;
use gripmock_runtime::config::DEFAULT_GRPC_PORT;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic_health::server::HealthReporter;

use crate::state::State;

pub mod codec;
pub mod handlers;
pub mod health;
pub mod metadata;
pub mod service;

pub use codec::DynamicCodec;
pub use service::DynamicService;

use health::{HealthSync, HEALTH_SYNC_INTERVAL};

#[derive(Clone)]
pub struct GrpcService {
    // The state we share with every call handler
    state: Arc<State>,

    port: u16,
    host: String,
    reflection: bool,
}

impl std::fmt::Debug for GrpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcService")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("reflection", &self.reflection)
            .finish()
    }
}

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct GrpcServiceConfig {
    state: Arc<State>,

    #[builder(default = "DEFAULT_GRPC_PORT")]
    port: u16,

    #[builder(setter(into), default = "String::from(\"0.0.0.0\")")]
    host: String,

    #[builder(default = "true")]
    reflection: bool,
}

impl GrpcServiceConfigBuilder {
    pub fn build(self) -> Result<GrpcService> {
        let config = self.build_internal()?;
        Ok(GrpcService {
            state: config.state,
            port: config.port,
            host: config.host,
            reflection: config.reflection,
        })
    }
}

impl GrpcService {
    pub fn builder() -> GrpcServiceConfigBuilder {
        GrpcServiceConfigBuilder::default()
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Health, reflection (when enabled) and the dynamic fallback, plus the reporter that
    /// drives the health service.
    pub fn routes(&self) -> Result<(Routes, HealthReporter)> {
        let (reporter, health) = tonic_health::server::health_reporter();

        let mut builder = Routes::builder();
        builder.add_service(health);
        if self.reflection {
            let files = self.state.descriptors().file_descriptor_set();
            let v1 = tonic_reflection::server::Builder::configure()
                .register_file_descriptor_set(files.clone())
                .build_v1()
                .context("failed to build reflection service")?;
            let v1alpha = tonic_reflection::server::Builder::configure()
                .register_file_descriptor_set(files)
                .build_v1alpha()
                .context("failed to build reflection service")?;
            builder.add_service(v1);
            builder.add_service(v1alpha);
        }

        let router = builder
            .routes()
            .into_axum_router()
            .fallback_service(DynamicService::new(self.state.clone()));
        Ok((Routes::from(router), reporter))
    }

    pub async fn spawn(&self, cancel_token: CancellationToken) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(cancel_token).await })
    }

    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&address)
            .await
            .inspect_err(|_| cancel_token.cancel())
            .with_context(|| format!("failed to bind gRPC listener to {address}"))?;
        self.run_with_listener(listener, cancel_token).await
    }

    /// Serves on an already bound listener until `cancel_token` fires.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        let address = listener.local_addr()?;
        let (routes, reporter) = self.routes()?;

        let mut health = HealthSync::new(reporter, self.state.descriptors().clone());
        health.sync().await;
        tokio::spawn(health.run(HEALTH_SYNC_INTERVAL, self.state.runtime().child_token()));

        tracing::info!(%address, reflection = self.reflection, "Starting gRPC mock on: {address}");
        self.state.set_ready(true);

        let observer = cancel_token.child_token();
        let result = Server::builder()
            .add_routes(routes)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                observer.cancelled_owned(),
            )
            .await;
        self.state.set_ready(false);
        result.inspect_err(|_| cancel_token.cancel())?;

        tracing::debug!(%address, "gRPC mock stopped");
        Ok(())
    }
}
