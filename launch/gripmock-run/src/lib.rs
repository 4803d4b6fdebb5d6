// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::Context as _;
use gripmock_engine::admin::spawn_admin_server;
use gripmock_engine::session;
use gripmock_engine::stubs::watcher::StubWatcher;
use gripmock_engine::{DescriptorRegistry, FunctionRegistry, GrpcService, State};
use gripmock_runtime::{Runtime, ServerConfig};

mod flags;
pub use flags::Flags;

pub async fn run(runtime: Runtime, config: ServerConfig, flags: Flags) -> anyhow::Result<()> {
    //
    // Descriptors
    //

    let descriptors = Arc::new(DescriptorRegistry::new());
    for path in &flags.descriptors {
        descriptors
            .load_path(path)
            .with_context(|| format!("failed to load descriptors from {}", path.display()))?;
    }
    let services = descriptors.services().len();
    if services == 0 {
        anyhow::bail!("no services found in the given descriptor sets");
    }
    tracing::info!(services, "Descriptor registry ready");

    //
    // Stubs
    //

    let functions = Arc::new(FunctionRegistry::with_builtins());
    let state = Arc::new(State::from_config(
        runtime.clone(),
        descriptors,
        functions,
        &config,
    ));

    let loaded = state.loader().load_paths(&flags.stubs);
    tracing::info!(stubs = loaded, files = state.loader().tracked_files().len(), "Loaded stub files");

    //
    // Background loops
    //

    if config.stub_watcher_enabled && !flags.stubs.is_empty() {
        let watcher = StubWatcher::new(state.loader().clone(), flags.stubs.clone());
        tokio::spawn(watcher.run(config.stub_watcher_interval, runtime.child_token()));
    }
    tokio::spawn(session::run_gc(
        state.sessions().clone(),
        state.store().clone(),
        state.history().clone(),
        config.session_gc_interval,
        config.session_gc_ttl,
        runtime.child_token(),
    ));

    //
    // Listeners
    //

    let (admin_address, admin) = spawn_admin_server(
        &config.http_host,
        config.http_port,
        runtime.endpoint_token(),
        state.clone(),
    )
    .await?;
    tracing::info!(address = %admin_address, "Admin API listening");

    let grpc = GrpcService::builder()
        .state(state)
        .host(config.grpc_host.clone())
        .port(config.grpc_port)
        .reflection(config.reflection_enabled)
        .build()?;
    let grpc_task = grpc.spawn(runtime.endpoint_token()).await;

    runtime.shutdown_on_signal().await;

    let grpc_result = grpc_task.await.context("gRPC task panicked")?;
    if let Err(e) = admin.await {
        tracing::error!("Admin task failed: {e}");
    }
    grpc_result
}
