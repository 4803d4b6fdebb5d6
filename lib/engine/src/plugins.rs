// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plugin system: named functions available to templates and hooks.
//!
//! A [`Plugin`] contributes [`FuncSpec`]s. Each spec carries its callable in one of the
//! [`FuncShape`]s; the [`FunctionRegistry`] normalizes every shape into the canonical [`Func`]
//! before storing it, so callers never branch on shape.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod builtins;
pub mod registry;

pub use registry::FunctionRegistry;

/// Function group invoked after every successful stub match with `(query, stub)`.
pub const MATCHER_HOOK_GROUP: &str = "matcher-hook";

/// Function group invoked after every served RPC with `(call record)`.
pub const RUNTIME_HOOK_GROUP: &str = "runtime-hook";

pub const TEMPLATE_FUNCS_CAPABILITY: &str = "template-funcs";

/// Canonical function signature.
pub type Func = Arc<dyn Fn(&CallContext, &[Value]) -> Result<Value, FunctionError> + Send + Sync>;

/// Boxes a closure as a [`Func`].
pub fn func(
    f: impl Fn(&CallContext, &[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
) -> Func {
    Arc::new(f)
}

/// What a function knows about the call it runs in.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub service: Option<String>,
    pub method: Option<String>,
    pub session: Option<String>,
    pub request_id: Option<Uuid>,
}

impl CallContext {
    pub fn for_call(service: &str, method: &str, session: Option<&str>, request_id: Uuid) -> Self {
        Self {
            service: Some(service.to_string()),
            method: Some(method.to_string()),
            session: session.map(str::to_string),
            request_id: Some(request_id),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum FunctionError {
    #[error("{function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl FunctionError {
    pub fn invalid(function: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

/// Accepted callable shapes.
#[derive(Clone)]
pub enum FuncShape {
    /// `() -> value`
    Nullary(Arc<dyn Fn() -> Value + Send + Sync>),
    /// `(args...) -> value`; a single array argument is spread into the argument list
    Variadic(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>),
    /// `(args...) -> value or error`
    Fallible(Arc<dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync>),
    /// Canonical form, receives the call context
    Contextual(Func),
    /// Wraps the function named by `FuncSpec::decorates`
    Decorator(Arc<dyn Fn(Func) -> Func + Send + Sync>),
}

impl fmt::Debug for FuncShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            FuncShape::Nullary(_) => "Nullary",
            FuncShape::Variadic(_) => "Variadic",
            FuncShape::Fallible(_) => "Fallible",
            FuncShape::Contextual(_) => "Contextual",
            FuncShape::Decorator(_) => "Decorator",
        };
        f.write_str(shape)
    }
}

impl FuncShape {
    /// Canonical form of a plain function. Decorators have none until applied to a target.
    pub fn normalize(self) -> Option<Func> {
        match self {
            FuncShape::Nullary(f) => Some(func(move |_, _| Ok(f()))),
            FuncShape::Variadic(f) => Some(func(move |_, args| match args {
                [Value::Array(items)] => Ok(f(items)),
                _ => Ok(f(args)),
            })),
            FuncShape::Fallible(f) => Some(func(move |_, args| f(args))),
            FuncShape::Contextual(f) => Some(f),
            FuncShape::Decorator(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuncSpec {
    pub name: String,
    pub shape: FuncShape,
    pub description: String,
    pub group: String,
    /// `"@owner/target"` or `"target"`
    pub decorates: String,
    pub replacement: String,
}

impl FuncSpec {
    fn new(name: impl Into<String>, shape: FuncShape) -> Self {
        Self {
            name: name.into(),
            shape,
            description: String::new(),
            group: String::new(),
            decorates: String::new(),
            replacement: String::new(),
        }
    }

    pub fn nullary(name: impl Into<String>, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::new(name, FuncShape::Nullary(Arc::new(f)))
    }

    pub fn variadic(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, FuncShape::Variadic(Arc::new(f)))
    }

    pub fn fallible(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, FuncShape::Fallible(Arc::new(f)))
    }

    pub fn contextual(
        name: impl Into<String>,
        f: impl Fn(&CallContext, &[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, FuncShape::Contextual(Arc::new(f)))
    }

    /// A function named `name` that wraps `target`.
    pub fn decorator(
        name: impl Into<String>,
        target: impl Into<String>,
        f: impl Fn(Func) -> Func + Send + Sync + 'static,
    ) -> Self {
        let mut spec = Self::new(name, FuncShape::Decorator(Arc::new(f)));
        spec.decorates = target.into();
        spec
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    Builtin,
    #[default]
    External,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub kind: PluginKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decorates: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decorates_plugin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replacement: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deactivated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginWithFuncs {
    pub plugin: PluginInfo,
    pub funcs: Vec<FunctionInfo>,
}

/// A compiled-in plugin.
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;
    fn specs(&self) -> Vec<FuncSpec>;
}
