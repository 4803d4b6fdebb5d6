// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Call metadata in and out.

use std::collections::BTreeMap;

use serde_json::Value;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::convert::Map;
use crate::session::SESSION_HEADER;

/// Transport headers never offered to header matching.
const EXCLUDED_HEADERS: [&str; 7] = [
    ":authority",
    "content-type",
    "grpc-accept-encoding",
    "user-agent",
    "accept-encoding",
    "te",
    "grpc-timeout",
];

/// Request headers as a map; repeated keys are joined with `;`.
pub fn request_headers(metadata: &MetadataMap) -> Map {
    let headers = metadata.clone().into_headers();
    let mut map = Map::new();
    for name in headers.keys() {
        if EXCLUDED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        map.insert(name.as_str().to_string(), Value::String(values.join(";")));
    }
    map
}

pub fn session(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Stub response headers as metadata; a value holding `;` becomes several values.
pub fn response_metadata(headers: &BTreeMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (name, value) in headers {
        let key = match AsciiMetadataKey::from_bytes(name.to_ascii_lowercase().as_bytes()) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(header = %name, error = %err, "skipping invalid response header");
                continue;
            }
        };
        for part in value.split(';') {
            match AsciiMetadataValue::try_from(part.trim()) {
                Ok(value) => {
                    metadata.append(key.clone(), value);
                }
                Err(err) => {
                    tracing::warn!(header = %name, error = %err, "skipping invalid header value");
                }
            }
        }
    }
    metadata
}
