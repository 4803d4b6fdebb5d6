// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Render-time template expansion for stub outputs.
//!
//! Every function in the [`FunctionRegistry`] is exposed to `minijinja` as a global. A
//! [`Renderer`] is built per call so functions see that call's [`CallContext`]; strings
//! without template markers are never parsed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use minijinja::value::Rest;
use minijinja::{Environment, ErrorKind};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::convert::Map;
use crate::plugins::{CallContext, FunctionRegistry};

pub mod compat;

/// Nesting limit for objects and arrays walked by [`Renderer::render_value`].
pub const MAX_RECURSION_DEPTH: usize = 250;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to render template {source_text:?}: {source}")]
    Render {
        source_text: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("maximum recursion depth exceeded")]
    DepthExceeded,
}

/// Whether `text` carries `{{ }}` or `{% %}` markers.
pub fn is_template(text: &str) -> bool {
    (text.contains("{{") && text.contains("}}")) || (text.contains("{%") && text.contains("%}"))
}

/// Whether any string inside `value` is a template.
pub fn has_templates(value: &Value) -> bool {
    match value {
        Value::String(text) => is_template(text),
        Value::Array(items) => items.iter().any(has_templates),
        Value::Object(map) => map.values().any(has_templates),
        _ => false,
    }
}

/// Variables visible to a template.
#[derive(Debug, Clone)]
pub struct TemplateData {
    pub request: Map,
    pub requests: Vec<Value>,
    pub headers: Map,
    pub message_index: usize,
    pub request_time: DateTime<Utc>,
    pub state: Map,
    pub stub_id: Uuid,
    pub request_id: Uuid,
    /// Usage count after this call's increment
    pub attempt_number: u64,
    pub max_attempts: u64,
}

impl Default for TemplateData {
    fn default() -> Self {
        Self {
            request: Map::new(),
            requests: Vec::new(),
            headers: Map::new(),
            message_index: 0,
            request_time: Utc::now(),
            state: Map::new(),
            stub_id: Uuid::nil(),
            request_id: Uuid::new_v4(),
            attempt_number: 1,
            max_attempts: 0,
        }
    }
}

impl TemplateData {
    /// Template context with every variable under its PascalCase and lowerCamel name.
    pub fn to_context(&self) -> Value {
        let attempt_index = self.attempt_number.saturating_sub(1);
        let vars = [
            ("Request", Value::Object(self.request.clone())),
            ("Requests", Value::Array(self.requests.clone())),
            ("Headers", Value::Object(self.headers.clone())),
            ("MessageIndex", json!(self.message_index)),
            ("RequestTime", json!(self.request_time.to_rfc3339())),
            ("Timestamp", json!(self.request_time.timestamp())),
            ("State", Value::Object(self.state.clone())),
            ("StubID", json!(self.stub_id.to_string())),
            ("RequestID", json!(self.request_id.to_string())),
            ("AttemptNumber", json!(self.attempt_number)),
            ("AttemptIndex", json!(attempt_index)),
            ("MaxAttempts", json!(self.max_attempts)),
            ("TotalAttempts", json!(self.attempt_number)),
        ];

        let mut context = Map::new();
        for (name, value) in vars {
            context.insert(lower_camel(name), value.clone());
            context.insert(name.to_string(), value);
        }
        Value::Object(context)
    }
}

/// `StubID` -> `stubId`, `MessageIndex` -> `messageIndex`
fn lower_camel(name: &str) -> String {
    let name = name.strip_suffix("ID").map_or_else(|| name.to_string(), |head| format!("{head}Id"));
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Builds per-call renderers over the current function table.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    functions: Arc<FunctionRegistry>,
}

impl TemplateEngine {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn renderer(&self, call: CallContext, data: &TemplateData) -> Renderer {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);

        let call = Arc::new(call);
        let mut names = HashSet::new();
        for (name, func) in self.functions.funcs() {
            let call = call.clone();
            names.insert(name.clone());
            env.add_function(
                name,
                move |args: Rest<minijinja::Value>| -> Result<minijinja::Value, minijinja::Error> {
                    let args = args
                        .iter()
                        .map(serde_json::to_value)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|err| minijinja::Error::new(ErrorKind::BadSerialization, err.to_string()))?;
                    let result = func(&call, &args)
                        .map_err(|err| minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()))?;
                    Ok(minijinja::Value::from_serialize(&result))
                },
            );
        }

        Renderer {
            env,
            names,
            context: data.to_context(),
        }
    }
}

/// A ready environment plus the context of one call.
pub struct Renderer {
    env: Environment<'static>,
    names: HashSet<String>,
    context: Value,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer").field("functions", &self.names.len()).finish()
    }
}

impl Renderer {
    /// Rebinds `MessageIndex` for the next render.
    pub fn set_message_index(&mut self, index: usize) {
        if let Value::Object(context) = &mut self.context {
            context.insert("MessageIndex".to_string(), json!(index));
            context.insert("messageIndex".to_string(), json!(index));
        }
    }

    /// Renders `text` if it is a template; otherwise returns it as-is.
    pub fn render_str(&self, text: &str) -> Result<String, TemplateError> {
        if !is_template(text) {
            return Ok(text.to_string());
        }
        let source = compat::translate(text, |name| self.names.contains(name));
        self.env
            .render_str(&source, &self.context)
            .map_err(|source| TemplateError::Render {
                source_text: text.to_string(),
                source,
            })
    }

    /// Renders every template string inside `value`.
    pub fn render_value(&self, value: &Value) -> Result<Value, TemplateError> {
        self.render_at(value, 0)
    }

    pub fn render_map(&self, map: &Map) -> Result<Map, TemplateError> {
        self.render_object(map, 0)
    }

    fn render_at(&self, value: &Value, depth: usize) -> Result<Value, TemplateError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(TemplateError::DepthExceeded);
        }
        Ok(match value {
            Value::String(text) => Value::String(self.render_str(text)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_at(item, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(self.render_object(map, depth)?),
            other => other.clone(),
        })
    }

    fn render_object(&self, map: &Map, depth: usize) -> Result<Map, TemplateError> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.render_at(value, depth + 1)?)))
            .collect()
    }
}
