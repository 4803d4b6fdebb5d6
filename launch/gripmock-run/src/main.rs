// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use gripmock_run::Flags;
use gripmock_runtime::{logging, Runtime, ServerConfig};

fn main() -> anyhow::Result<()> {
    logging::init();
    let flags = Flags::parse();

    let mut config = ServerConfig::from_settings()?;
    flags.apply(&mut config);
    tracing::info!(%config, "Starting GripMock");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(async move {
        let runtime = Runtime::new(config.graceful_shutdown_timeout());
        gripmock_run::run(runtime, config, flags).await
    })
}
