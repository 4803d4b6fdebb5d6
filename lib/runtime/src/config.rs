// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use gripmock_config::env_is_truthy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

pub mod environment_names;

const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_GRPC_PORT: u16 = 4770;
pub const DEFAULT_HTTP_PORT: u16 = 4771;

const DEFAULT_STUB_WATCHER_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SESSION_GC_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SESSION_GC_TTL: Duration = Duration::from_secs(60);

/// Server configuration
/// Everything the launcher needs to bring up the gRPC mock and its admin surface.
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct ServerConfig {
    /// Address the gRPC mock listens on
    /// Set this at runtime with environment variable GRIPMOCK_GRPC_HOST
    #[builder(setter(into), default = "DEFAULT_HOST.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub grpc_host: String,

    /// Set this at runtime with environment variable GRIPMOCK_GRPC_PORT
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_GRPC_PORT")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub grpc_port: u16,

    /// Address the admin REST surface listens on
    /// Set this at runtime with environment variable GRIPMOCK_HTTP_HOST
    #[builder(setter(into), default = "DEFAULT_HOST.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_host: String,

    /// Set this at runtime with environment variable GRIPMOCK_HTTP_PORT
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_HTTP_PORT")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_port: u16,

    /// Re-read stub files when they change on disk
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub stub_watcher_enabled: bool,

    /// How often stub paths are polled for changes
    #[serde(with = "duration")]
    #[builder(default = "DEFAULT_STUB_WATCHER_INTERVAL")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub stub_watcher_interval: Duration,

    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub history_enabled: bool,

    /// Request/response keys replaced with `[REDACTED]` before a call is recorded
    /// Set this at runtime with environment variable GRIPMOCK_HISTORY_REDACT_KEYS (comma separated)
    #[serde(deserialize_with = "list::deserialize")]
    #[builder(default = "vec![]")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub history_redact_keys: Vec<String>,

    /// Oldest calls are evicted once recorded history exceeds this many bytes (0 = unlimited)
    #[builder(default = "0")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub history_limit_bytes: u64,

    /// Requests or responses larger than this are recorded as `{"_truncated": true}` (0 = off)
    #[builder(default = "0")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub history_message_max_bytes: u64,

    #[serde(with = "duration")]
    #[builder(default = "DEFAULT_SESSION_GC_INTERVAL")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub session_gc_interval: Duration,

    /// Sessions idle for longer than this lose their stubs and history
    #[serde(with = "duration")]
    #[builder(default = "DEFAULT_SESSION_GC_TTL")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub session_gc_ttl: Duration,

    /// Expose the registered descriptors through gRPC server reflection
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub reflection_enabled: bool,

    /// Grace period, in seconds, for in-flight calls at shutdown
    #[builder(default = "5")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub graceful_shutdown_timeout: u64,
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grpc={}:{}, ", self.grpc_host, self.grpc_port)?;
        write!(f, "http={}:{}, ", self.http_host, self.http_port)?;
        write!(
            f,
            "stub_watcher_enabled={}, stub_watcher_interval={}, ",
            self.stub_watcher_enabled,
            humantime::format_duration(self.stub_watcher_interval)
        )?;
        write!(f, "history_enabled={}, ", self.history_enabled)?;
        write!(f, "history_redact_keys={:?}, ", self.history_redact_keys)?;
        write!(
            f,
            "history_limit_bytes={}, history_message_max_bytes={}, ",
            self.history_limit_bytes, self.history_message_max_bytes
        )?;
        write!(
            f,
            "session_gc_interval={}, session_gc_ttl={}, ",
            humantime::format_duration(self.session_gc_interval),
            humantime::format_duration(self.session_gc_ttl)
        )?;
        write!(f, "reflection_enabled={}, ", self.reflection_enabled)?;
        write!(
            f,
            "graceful_shutdown_timeout={}s",
            self.graceful_shutdown_timeout
        )
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub(crate) fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file("/opt/gripmock/defaults.toml"))
            .merge(Toml::file("/opt/gripmock/etc/gripmock.toml"))
            .merge(Env::prefixed("GRIPMOCK_").filter_map(|k| {
                let full_key = format!("GRIPMOCK_{}", k.as_str());
                // filters out empty environment variables
                match std::env::var(&full_key) {
                    Ok(v) if !v.is_empty() => Some(k.into()),
                    _ => None,
                }
            }))
    }

    /// Load the server configuration from the environment and configuration files
    /// Configuration is prioritised in the following order, where the last has the lowest priority:
    /// 1. Environment variables prefixed with `GRIPMOCK_` (top priority)
    /// 2. /opt/gripmock/etc/gripmock.toml
    /// 3. /opt/gripmock/defaults.toml (lowest priority)
    pub fn from_settings() -> Result<ServerConfig> {
        let config: ServerConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_host: DEFAULT_HOST.to_string(),
            grpc_port: DEFAULT_GRPC_PORT,
            http_host: DEFAULT_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            stub_watcher_enabled: true,
            stub_watcher_interval: DEFAULT_STUB_WATCHER_INTERVAL,
            history_enabled: true,
            history_redact_keys: vec![],
            history_limit_bytes: 0,
            history_message_max_bytes: 0,
            session_gc_interval: DEFAULT_SESSION_GC_INTERVAL,
            session_gc_ttl: DEFAULT_SESSION_GC_TTL,
            reflection_enabled: true,
            graceful_shutdown_timeout: 5,
        }
    }
}

impl ServerConfigBuilder {
    /// Build and validate the server configuration
    pub fn build(&self) -> Result<ServerConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Durations travel as humantime strings (`"1s"`) and accept bare integers as milliseconds.
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    fn parse<E: serde::de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => gripmock_config::parse_duration(&text).map_err(E::custom),
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        parse(Raw::deserialize(deserializer)?)
    }

}

/// Lists accept either a sequence or a comma separated string.
mod list {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Raw::deserialize(deserializer)? {
            Raw::List(items) => items,
            Raw::Text(text) => gripmock_config::parse_list(&text),
        })
    }
}

/// Check whether JSONL logging enabled
/// Set the `GRIPMOCK_LOGGING_JSONL` environment variable a [`gripmock_config::is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::GRIPMOCK_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::GRIPMOCK_SDK_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::GRIPMOCK_LOG_USE_LOCAL_TZ)
}
