// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Value parsing helpers for GripMock configuration.
//!
//! Environment variables and stub files hand us loosely formatted strings. These
//! helpers turn them into flags, durations and lists with one set of rules so every
//! layer agrees on what `"on"` or `"1500ms"` means.

use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("environment variable {name} is not valid unicode")]
    NotUnicode { name: String },
}

/// Truthy values: "1", "true", "on", "yes" (case-insensitive, surrounding whitespace ignored).
pub fn is_truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Parse a duration such as `"1s"`, `"250ms"` or `"1m 30s"`.
///
/// A bare integer is read as milliseconds, which is what stub files use for `delay`.
pub fn parse_duration(val: &str) -> Result<Duration, ConfigError> {
    let val = val.trim();
    if let Ok(millis) = val.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(val).map_err(|e| ConfigError::InvalidDuration {
        value: val.to_string(),
        reason: e.to_string(),
    })
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_value(env: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(env) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            name: env.to_string(),
        }),
    }
}

/// `false` when the variable is unset or not truthy.
pub fn env_is_truthy(env: &str) -> bool {
    matches!(env_value(env), Ok(Some(val)) if is_truthy(&val))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        for val in ["1", "true", "True", "TRUE", "on", "ON", "yes", " yes "] {
            assert!(is_truthy(val), "{val} should be truthy");
        }
        for val in ["0", "false", "off", "no", "", "random"] {
            assert!(!is_truthy(val), "{val} should not be truthy");
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("150").unwrap(), Duration::from_millis(150));
        assert!(matches!(
            parse_duration("soon"),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" password, token ,,secret"),
            vec!["password", "token", "secret"]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_env_is_truthy() {
        temp_env::with_vars(
            [
                ("GRIPMOCK_TEST_FLAG_ON", Some("on")),
                ("GRIPMOCK_TEST_FLAG_OFF", Some("0")),
                ("GRIPMOCK_TEST_FLAG_EMPTY", Some("")),
            ],
            || {
                assert!(env_is_truthy("GRIPMOCK_TEST_FLAG_ON"));
                assert!(!env_is_truthy("GRIPMOCK_TEST_FLAG_OFF"));
                assert!(!env_is_truthy("GRIPMOCK_TEST_FLAG_EMPTY"));
            },
        );
        assert!(!env_is_truthy("DEFINITELY_NOT_SET_VAR_12345"));
    }
}
