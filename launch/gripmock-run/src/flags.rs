// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;
use gripmock_runtime::config::environment_names::server as env_server;
use gripmock_runtime::ServerConfig;

/// Serve stubbed responses for every service in the given descriptor sets.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Flags {
    /// Descriptor set files (`protoc --descriptor_set_out`, `buf build -o`) or directories
    /// holding them.
    #[arg(required = true, value_name = "DESCRIPTORS")]
    pub descriptors: Vec<PathBuf>,

    /// Stub file or directory of stub files (JSON or YAML). Repeatable.
    #[arg(long = "stub", value_name = "DIR|FILE")]
    pub stubs: Vec<PathBuf>,

    /// Interface the gRPC mock listens on.
    #[arg(long, env = env_server::GRIPMOCK_GRPC_HOST)]
    pub grpc_host: Option<String>,

    /// Port the gRPC mock listens on.
    #[arg(long, env = env_server::GRIPMOCK_GRPC_PORT)]
    pub grpc_port: Option<u16>,

    /// Interface the admin API listens on.
    #[arg(long, env = env_server::GRIPMOCK_HTTP_HOST)]
    pub http_host: Option<String>,

    /// Port the admin API listens on.
    #[arg(long, env = env_server::GRIPMOCK_HTTP_PORT)]
    pub http_port: Option<u16>,

    /// Load stub files once and stop watching them for changes.
    #[arg(long)]
    pub no_watch: bool,

    /// Do not serve gRPC server reflection.
    #[arg(long)]
    pub no_reflection: bool,
}

impl Flags {
    /// Flags win over every other configuration layer.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.grpc_host {
            config.grpc_host = host.clone();
        }
        if let Some(port) = self.grpc_port {
            config.grpc_port = port;
        }
        if let Some(host) = &self.http_host {
            config.http_host = host.clone();
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if self.no_watch {
            config.stub_watcher_enabled = false;
        }
        if self.no_reflection {
            config.reflection_enabled = false;
        }
    }
}
