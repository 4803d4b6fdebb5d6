// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable names read by GripMock.
//!
//! ## Organization
//!
//! - **Logging**: log level, format and timestamp settings
//! - **Server**: listener addresses and the knobs of the mock engine; every
//!   constant here maps one-to-one onto a [`super::ServerConfig`] field

/// Logging environment variables
pub mod logging {
    /// Log filter in `EnvFilter` directive syntax (e.g. "debug", "gripmock_engine=trace")
    pub const GRIPMOCK_LOG: &str = "GRIPMOCK_LOG";

    /// Path to a TOML logging configuration file
    pub const GRIPMOCK_LOGGING_CONFIG_PATH: &str = "GRIPMOCK_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const GRIPMOCK_LOGGING_JSONL: &str = "GRIPMOCK_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const GRIPMOCK_SDK_DISABLE_ANSI_LOGGING: &str = "GRIPMOCK_SDK_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const GRIPMOCK_LOG_USE_LOCAL_TZ: &str = "GRIPMOCK_LOG_USE_LOCAL_TZ";
}

/// Server configuration environment variables
pub mod server {
    pub const GRIPMOCK_GRPC_HOST: &str = "GRIPMOCK_GRPC_HOST";
    pub const GRIPMOCK_GRPC_PORT: &str = "GRIPMOCK_GRPC_PORT";
    pub const GRIPMOCK_HTTP_HOST: &str = "GRIPMOCK_HTTP_HOST";
    pub const GRIPMOCK_HTTP_PORT: &str = "GRIPMOCK_HTTP_PORT";

    /// Poll stub files for changes ("true"/"false")
    pub const GRIPMOCK_STUB_WATCHER_ENABLED: &str = "GRIPMOCK_STUB_WATCHER_ENABLED";

    /// Poll interval, humantime format (e.g. "1s", "500ms")
    pub const GRIPMOCK_STUB_WATCHER_INTERVAL: &str = "GRIPMOCK_STUB_WATCHER_INTERVAL";

    pub const GRIPMOCK_HISTORY_ENABLED: &str = "GRIPMOCK_HISTORY_ENABLED";

    /// Comma separated keys redacted from recorded requests and responses
    pub const GRIPMOCK_HISTORY_REDACT_KEYS: &str = "GRIPMOCK_HISTORY_REDACT_KEYS";

    pub const GRIPMOCK_HISTORY_LIMIT_BYTES: &str = "GRIPMOCK_HISTORY_LIMIT_BYTES";
    pub const GRIPMOCK_HISTORY_MESSAGE_MAX_BYTES: &str = "GRIPMOCK_HISTORY_MESSAGE_MAX_BYTES";

    pub const GRIPMOCK_SESSION_GC_INTERVAL: &str = "GRIPMOCK_SESSION_GC_INTERVAL";
    pub const GRIPMOCK_SESSION_GC_TTL: &str = "GRIPMOCK_SESSION_GC_TTL";

    pub const GRIPMOCK_REFLECTION_ENABLED: &str = "GRIPMOCK_REFLECTION_ENABLED";

    /// Seconds to wait for in-flight calls at shutdown
    pub const GRIPMOCK_GRACEFUL_SHUTDOWN_TIMEOUT: &str = "GRIPMOCK_GRACEFUL_SHUTDOWN_TIMEOUT";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_names_share_prefix() {
        for name in [
            server::GRIPMOCK_GRPC_HOST,
            server::GRIPMOCK_STUB_WATCHER_INTERVAL,
            server::GRIPMOCK_HISTORY_REDACT_KEYS,
            server::GRIPMOCK_GRACEFUL_SHUTDOWN_TIMEOUT,
        ] {
            assert!(name.starts_with("GRIPMOCK_"), "{name}");
        }
    }
}
