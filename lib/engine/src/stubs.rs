// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stub data model.
//!
//! A [`Stub`] maps an expected request (per method, optionally per session) onto a response.
//! Stubs arrive as JSON or YAML through the admin API or stub files and are stored as-is;
//! template expressions inside the output are only evaluated when a call is answered.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::convert::Map;

pub mod compare;
pub mod limiter;
pub mod loader;
pub mod matcher;
pub mod store;
pub mod watcher;

pub use limiter::UsageLimiter;
pub use matcher::{MatchError, Matcher, Query};
pub use store::{StoreError, StubStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stub {
    /// Nil until the store assigns one
    #[serde(default)]
    pub id: Uuid,
    pub service: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "InputHeader::is_empty")]
    pub headers: InputHeader,
    #[serde(default, skip_serializing_if = "InputData::is_empty")]
    pub input: InputData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputData>,
    #[serde(default)]
    pub output: Output,
    #[serde(default, skip_serializing_if = "StubOptions::is_unlimited")]
    pub options: StubOptions,
}

/// Match spec over request fields. A `None` map is "not set"; an empty map is set and matches anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_array_order: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Map>,
}

/// Match spec over call metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Map>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StubOptions {
    /// Maximum number of successful matches, 0 = unlimited
    #[serde(default)]
    pub times: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StatusCode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

impl InputData {
    pub fn is_empty(&self) -> bool {
        self.equals.is_none() && self.contains.is_none() && self.matches.is_none()
    }

    /// Number of request fields this spec constrains
    pub fn field_count(&self) -> usize {
        [&self.equals, &self.contains, &self.matches]
            .into_iter()
            .flatten()
            .map(|m| m.len())
            .sum()
    }
}

impl InputHeader {
    pub fn is_empty(&self) -> bool {
        self.equals.is_none() && self.contains.is_none() && self.matches.is_none()
    }

    pub fn as_input(&self) -> InputData {
        InputData {
            ignore_array_order: false,
            equals: self.equals.clone(),
            contains: self.contains.clone(),
            matches: self.matches.clone(),
        }
    }
}

impl StubOptions {
    pub fn is_unlimited(&self) -> bool {
        self.times == 0
    }
}

impl Output {
    fn has_unary_output(&self) -> bool {
        self.data.is_some() || !self.error.is_empty() || self.code.is_some()
    }
}

impl Stub {
    /// Checks the shape of a stub before it is stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.service.trim().is_empty() {
            return Err("service name is missing".to_string());
        }
        if self.method.trim().is_empty() {
            return Err("method name is missing".to_string());
        }
        if self.input.is_empty() == self.inputs.is_empty() {
            return Err(
                "invalid input configuration: must have either 'input' or 'inputs', but not both"
                    .to_string(),
            );
        }
        if self.output.has_unary_output() == !self.output.stream.is_empty() {
            return Err(
                "invalid output configuration: must have either 'data' or 'stream', but not both"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Whether the stub is visible to a call carrying `session`.
    /// Session-less stubs are visible to everyone; session stubs only to their own session.
    pub fn visible_to(&self, session: Option<&str>) -> bool {
        match self.session.as_deref() {
            None | Some("") => true,
            Some(own) => session == Some(own),
        }
    }

    /// Whether the stub declares `service`, comparing full and short (last segment) names.
    pub fn serves(&self, service: &str) -> bool {
        same_service(&self.service, service)
    }
}

/// Full names must agree; a short name matches any package with the same last segment.
pub fn same_service(a: &str, b: &str) -> bool {
    a == b || (!a.contains('.') || !b.contains('.')) && short_name(a) == short_name(b)
}

/// `pkg.sub.Service` -> `Service`
pub fn short_name(service: &str) -> &str {
    service.rsplit('.').next().unwrap_or(service)
}

/// gRPC status code, written in stub files as a number (`5`) or a name (`"NOT_FOUND"`, `"NotFound"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub i32);

const CODE_NAMES: [&str; 17] = [
    "OK",
    "CANCELLED",
    "UNKNOWN",
    "INVALID_ARGUMENT",
    "DEADLINE_EXCEEDED",
    "NOT_FOUND",
    "ALREADY_EXISTS",
    "PERMISSION_DENIED",
    "RESOURCE_EXHAUSTED",
    "FAILED_PRECONDITION",
    "ABORTED",
    "OUT_OF_RANGE",
    "UNIMPLEMENTED",
    "INTERNAL",
    "UNAVAILABLE",
    "DATA_LOSS",
    "UNAUTHENTICATED",
];

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_uppercase)
            .collect();
        // the Go-style spelling "Canceled" is accepted too
        let wanted = if wanted == "CANCELED" { "CANCELLED".to_string() } else { wanted };
        CODE_NAMES
            .iter()
            .position(|candidate| candidate.replace('_', "") == wanted)
            .map(|i| StatusCode(i as i32))
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn to_grpc(self) -> tonic::Code {
        tonic::Code::from_i32(self.0)
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.0)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) if (0..CODE_NAMES.len() as i64).contains(&n) => Ok(StatusCode(n as i32)),
            Raw::Number(n) => Err(serde::de::Error::custom(format!("unknown status code {n}"))),
            Raw::Name(name) => StatusCode::from_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown status code \"{name}\""))),
        }
    }
}

/// Artificial latency, written as a humantime string (`"150ms"`) or milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delay(pub Duration);

impl Serialize for Delay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for Delay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Delay(Duration::from_millis(ms))),
            Raw::Text(text) => gripmock_config::parse_duration(&text)
                .map(Delay)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Stub {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_full_stub() {
        let stub = parse(json!({
            "id": "6c85b0fa-caaf-4640-a672-f56b7dd8074d",
            "service": "helloworld.Greeter",
            "method": "SayHello",
            "session": "A",
            "priority": 10,
            "headers": {"equals": {"x-user": "alex"}},
            "input": {"ignoreArrayOrder": true, "equals": {"name": "Alex"}, "contains": {}},
            "output": {"data": {"message": "Hi"}, "headers": {"x-served-by": "mock"}, "delay": "150ms", "code": "OK"},
            "options": {"times": 2}
        }));
        assert_eq!(stub.id.to_string(), "6c85b0fa-caaf-4640-a672-f56b7dd8074d");
        assert_eq!(stub.session.as_deref(), Some("A"));
        assert!(stub.input.ignore_array_order);
        assert_eq!(stub.input.field_count(), 1);
        assert_eq!(stub.input.contains, Some(Map::new()));
        assert_eq!(stub.output.delay, Some(Delay(Duration::from_millis(150))));
        assert_eq!(stub.output.code, Some(StatusCode::OK));
        assert_eq!(stub.options.times, 2);
        assert!(stub.validate().is_ok());
    }

    #[test]
    fn test_status_code_forms() {
        for (raw, code) in [
            (json!(5), 5),
            (json!("NOT_FOUND"), 5),
            (json!("NotFound"), 5),
            (json!("canceled"), 1),
            (json!("UNAUTHENTICATED"), 16),
        ] {
            let parsed: StatusCode = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(parsed.0, code, "{raw}");
        }
        assert!(serde_json::from_value::<StatusCode>(json!(42)).is_err());
        assert!(serde_json::from_value::<StatusCode>(json!("TEAPOT")).is_err());
        assert_eq!(StatusCode(5).to_grpc(), tonic::Code::NotFound);
    }

    #[test]
    fn test_delay_forms() {
        let delay: Delay = serde_json::from_value(json!(250)).unwrap();
        assert_eq!(delay.0, Duration::from_millis(250));
        let delay: Delay = serde_json::from_value(json!("1s")).unwrap();
        assert_eq!(delay.0, Duration::from_secs(1));
        assert_eq!(serde_json::to_value(delay).unwrap(), json!("1s"));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let base = json!({"service": "Greeter", "method": "SayHello"});

        let mut missing_input = base.clone();
        missing_input["output"] = json!({"data": {}});
        assert!(parse(missing_input).validate().unwrap_err().contains("input"));

        let mut both_inputs = base.clone();
        both_inputs["input"] = json!({"equals": {}});
        both_inputs["inputs"] = json!([{"equals": {}}]);
        both_inputs["output"] = json!({"data": {}});
        assert!(parse(both_inputs).validate().is_err());

        let mut stream_and_data = base.clone();
        stream_and_data["input"] = json!({"equals": {}});
        stream_and_data["output"] = json!({"data": {"a": 1}, "stream": [{"a": 1}]});
        assert!(parse(stream_and_data).validate().unwrap_err().contains("output"));

        let mut stream_and_error = base.clone();
        stream_and_error["input"] = json!({"equals": {}});
        stream_and_error["output"] = json!({"error": "boom", "stream": [{"a": 1}]});
        assert!(parse(stream_and_error).validate().is_err());

        let mut empty_output = base.clone();
        empty_output["input"] = json!({"equals": {}});
        assert!(parse(empty_output).validate().is_err());

        let mut no_service = base;
        no_service["service"] = json!("");
        no_service["input"] = json!({"equals": {}});
        no_service["output"] = json!({"data": {}});
        assert!(parse(no_service).validate().unwrap_err().contains("service"));
    }

    #[test]
    fn test_visibility_and_service_names() {
        let mut stub = parse(json!({"service": "helloworld.Greeter", "method": "SayHello"}));
        assert!(stub.visible_to(None));
        assert!(stub.visible_to(Some("A")));

        stub.session = Some("A".to_string());
        assert!(stub.visible_to(Some("A")));
        assert!(!stub.visible_to(Some("B")));
        assert!(!stub.visible_to(None));

        assert!(stub.serves("helloworld.Greeter"));
        assert!(stub.serves("Greeter"));
        assert!(!stub.serves("other.Greeter"));

        stub.service = "Greeter".to_string();
        assert!(stub.serves("helloworld.Greeter"));
        assert_eq!(short_name("a.b.C"), "C");
    }
}
