// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The built-in `gripmock` plugin: string, number, math, time, uuid and encoding helpers.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Number, Value};
use uuid::Uuid;

use super::{FuncSpec, FunctionError, Plugin, PluginInfo, PluginKind, TEMPLATE_FUNCS_CAPABILITY};

pub const BUILTIN_PLUGIN: &str = "gripmock";

#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins;

impl Plugin for Builtins {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: BUILTIN_PLUGIN.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            source: BUILTIN_PLUGIN.to_string(),
            kind: PluginKind::Builtin,
            description: "Built-in helpers preloaded by GripMock".to_string(),
            capabilities: vec![TEMPLATE_FUNCS_CAPABILITY.to_string()],
            ..Default::default()
        }
    }

    fn specs(&self) -> Vec<FuncSpec> {
        [
            string_funcs(),
            json_funcs(),
            format_funcs(),
            number_funcs(),
            array_funcs(),
            compare_funcs(),
            math_funcs(),
            time_funcs(),
            uuid_funcs(),
            encoding_funcs(),
        ]
        .into_iter()
        .flat_map(|(group, specs)| specs.into_iter().map(move |spec| spec.in_group(group)))
        .collect()
    }
}

type Group = (&'static str, Vec<FuncSpec>);

fn string_funcs() -> Group {
    (
        "string",
        vec![
            FuncSpec::fallible("upper", |args| Ok(json!(text_arg("upper", args, 0)?.to_uppercase())))
                .with_description("uppercase string"),
            FuncSpec::fallible("lower", |args| Ok(json!(text_arg("lower", args, 0)?.to_lowercase())))
                .with_description("lowercase string"),
            FuncSpec::fallible("title", |args| Ok(json!(title_case(&text_arg("title", args, 0)?))))
                .with_description("title case string"),
            FuncSpec::fallible("join", |args| {
                let items = match args.first() {
                    Some(Value::Array(items)) => items,
                    _ => return Err(FunctionError::invalid("join", "expects a list as first argument")),
                };
                let separator = text_arg("join", args, 1)?;
                Ok(json!(items.iter().map(to_text).collect::<Vec<_>>().join(&separator)))
            })
            .with_description("join slice with separator"),
            FuncSpec::fallible("split", |args| {
                let text = text_arg("split", args, 0)?;
                let separator = text_arg("split", args, 1)?;
                Ok(json!(text.split(separator.as_str()).collect::<Vec<_>>()))
            })
            .with_description("split string by separator"),
        ],
    )
}

fn json_funcs() -> Group {
    (
        "json",
        vec![FuncSpec::fallible("json", |args| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            Ok(json!(value.to_string()))
        })
        .with_description("encode value as JSON string")],
    )
}

fn format_funcs() -> Group {
    (
        "format",
        vec![
            FuncSpec::fallible("sprintf", |args| {
                let format = text_arg("sprintf", args, 0)?;
                Ok(json!(sprintf(&format, &args[1..])))
            })
            .with_description("printf-style formatting"),
            FuncSpec::fallible("str", |args| {
                Ok(json!(args.first().map(to_text).unwrap_or_default()))
            })
            .with_description("format value with default verb"),
        ],
    )
}

fn number_funcs() -> Group {
    (
        "number",
        vec![
            FuncSpec::fallible("int", |args| Ok(json!(first_number(args).trunc() as i64)))
                .with_description("convert to int"),
            FuncSpec::fallible("int64", |args| Ok(json!(first_number(args).trunc() as i64)))
                .with_description("convert to int64"),
            FuncSpec::fallible("float", |args| Ok(float_value(first_number(args))))
                .with_description("convert to float64"),
            FuncSpec::fallible("decimal", |args| Ok(float_value(first_number(args))))
                .with_description("render number as decimal"),
        ],
    )
}

fn array_funcs() -> Group {
    (
        "array",
        vec![FuncSpec::fallible("extract", |args| {
            let (Some(collection), Some(key)) = (args.first(), args.get(1)) else {
                return Err(FunctionError::invalid("extract", "expects a collection and a key"));
            };
            Ok(extract(collection, key))
        })
        .with_description("get element by key or index")],
    )
}

fn compare_funcs() -> Group {
    fn compare(
        name: &'static str,
        description: &'static str,
        test: fn(std::cmp::Ordering) -> bool,
    ) -> FuncSpec {
        FuncSpec::fallible(name, move |args| {
            let ordering = match (args.first().and_then(to_number), args.get(1).and_then(to_number)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            };
            Ok(json!(ordering.is_some_and(test)))
        })
        .with_description(description)
    }

    (
        "compare",
        vec![
            compare("gt", "a greater than b", std::cmp::Ordering::is_gt),
            compare("lt", "a less than b", std::cmp::Ordering::is_lt),
            compare("gte", "a greater or equal b", std::cmp::Ordering::is_ge),
            compare("lte", "a less or equal b", std::cmp::Ordering::is_le),
            compare("eq", "a equals b", std::cmp::Ordering::is_eq),
        ],
    )
}

fn math_funcs() -> Group {
    fn unary(name: &'static str, description: &'static str, op: fn(f64) -> f64) -> FuncSpec {
        FuncSpec::fallible(name, move |args| Ok(number_value(op(first_number(args)))))
            .with_description(description)
    }

    fn fold(name: &'static str, description: &'static str, op: fn(&[f64]) -> f64) -> FuncSpec {
        FuncSpec::variadic(name, move |args| match numbers(args) {
            Some(values) => number_value(op(&values)),
            None => json!(0),
        })
        .with_description(description)
    }

    (
        "math",
        vec![
            unary("round", "round to nearest integer", f64::round),
            unary("floor", "floor value", f64::floor),
            unary("ceil", "ceil value", f64::ceil),
            fold("add", "add numbers", |v| v.iter().sum()),
            fold("sum", "sum slice of numbers", |v| v.iter().sum()),
            fold("sub", "subtract numbers", |v| match v.split_first() {
                Some((first, rest)) => rest.iter().fold(*first, |acc, x| acc - x),
                None => 0.0,
            }),
            fold("mul", "multiply numbers", |v| v.iter().product()),
            fold("div", "divide numbers", |v| match v.split_first() {
                // zero divisors are skipped
                Some((first, rest)) => rest
                    .iter()
                    .filter(|x| **x != 0.0)
                    .fold(*first, |acc, x| acc / x),
                None => 0.0,
            }),
            fold("mod", "modulo of numbers", |v| match v {
                [a, b, ..] if *b != 0.0 => a % b,
                _ => 0.0,
            }),
            fold("avg", "average of numbers", |v| {
                if v.is_empty() {
                    0.0
                } else {
                    v.iter().sum::<f64>() / v.len() as f64
                }
            }),
            fold("min", "minimum of numbers", |v| {
                v.iter().copied().reduce(f64::min).unwrap_or(0.0)
            }),
            fold("max", "maximum of numbers", |v| {
                v.iter().copied().reduce(f64::max).unwrap_or(0.0)
            }),
        ],
    )
}

fn time_funcs() -> Group {
    (
        "time",
        vec![
            FuncSpec::nullary("now", || json!(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)))
                .with_description("current time (RFC 3339)"),
            FuncSpec::fallible("unix", |args| {
                let time = time_arg("unix", args.first())?;
                Ok(json!(time.timestamp()))
            })
            .with_description("timestamp seconds"),
            FuncSpec::fallible("format", |args| {
                let time = time_arg("format", args.first())?;
                let layout = text_arg("format", args, 1)?;
                let mut out = String::new();
                write!(out, "{}", time.format(&layout)).map_err(|_| {
                    FunctionError::invalid("format", format!("invalid layout \"{layout}\""))
                })?;
                Ok(json!(out))
            })
            .with_description("format time with a strftime layout"),
        ],
    )
}

fn uuid_funcs() -> Group {
    (
        "uuid",
        vec![FuncSpec::nullary("uuid", || json!(Uuid::new_v4().to_string()))
            .with_description("generate UUID v4")],
    )
}

fn encoding_funcs() -> Group {
    (
        "encoding",
        vec![
            FuncSpec::fallible("bytes", |args| {
                let text = text_arg("bytes", args, 0)?;
                Ok(json!(text.as_bytes()))
            })
            .with_description("string to bytes"),
            FuncSpec::fallible("string2base64", |args| {
                Ok(json!(STANDARD.encode(text_arg("string2base64", args, 0)?)))
            })
            .with_description("encode string to base64"),
            FuncSpec::fallible("bytes2base64", |args| {
                let bytes = bytes_arg("bytes2base64", args.first())?;
                Ok(json!(STANDARD.encode(bytes)))
            })
            .with_description("encode bytes to base64"),
            FuncSpec::fallible("uuid2base64", |args| {
                let id = uuid_arg("uuid2base64", args)?;
                Ok(json!(STANDARD.encode(id.as_bytes())))
            })
            .with_description("encode UUID to base64"),
            FuncSpec::fallible("uuid2bytes", |args| {
                let id = uuid_arg("uuid2bytes", args)?;
                Ok(json!(id.as_bytes()))
            })
            .with_description("UUID to bytes"),
            FuncSpec::fallible("uuid2int64", |args| {
                let id = uuid_arg("uuid2int64", args)?;
                let (high, low) = uuid_halves(&id);
                Ok(json!(format!(r#"{{"high":{high},"low":{low}}}"#)))
            })
            .with_description("UUID halves as little-endian int64 pair"),
        ],
    )
}

fn text_arg(function: &str, args: &[Value], index: usize) -> Result<String, FunctionError> {
    args.get(index)
        .map(to_text)
        .ok_or_else(|| FunctionError::invalid(function, format!("missing argument {}", index + 1)))
}

fn uuid_arg(function: &str, args: &[Value]) -> Result<Uuid, FunctionError> {
    let text = text_arg(function, args, 0)?;
    Uuid::parse_str(text.trim()).map_err(|e| FunctionError::invalid(function, e.to_string()))
}

fn bytes_arg(function: &str, value: Option<&Value>) -> Result<Vec<u8>, FunctionError> {
    match value {
        Some(Value::String(text)) => Ok(text.as_bytes().to_vec()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| FunctionError::invalid(function, "expects a list of bytes"))
            })
            .collect(),
        _ => Err(FunctionError::invalid(function, "expects bytes or a string")),
    }
}

/// RFC 3339 text or Unix seconds; no argument means now.
fn time_arg(function: &str, value: Option<&Value>) -> Result<DateTime<Utc>, FunctionError> {
    match value {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| FunctionError::invalid(function, format!("invalid timestamp {n}"))),
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| FunctionError::invalid(function, format!("invalid time \"{text}\": {e}"))),
        Some(other) => Err(FunctionError::invalid(function, format!("invalid time {other}"))),
    }
}

/// The first 8 and last 8 bytes of the UUID, each read as a little-endian i64.
pub fn uuid_halves(id: &Uuid) -> (i64, i64) {
    let bytes = id.as_bytes();
    let mut high = [0u8; 8];
    let mut low = [0u8; 8];
    high.copy_from_slice(&bytes[..8]);
    low.copy_from_slice(&bytes[8..]);
    (i64::from_le_bytes(high), i64::from_le_bytes(low))
}

/// Template-friendly text of a value: strings unquoted, everything else as JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn first_number(args: &[Value]) -> f64 {
    args.first().and_then(to_number).unwrap_or(0.0)
}

fn numbers(args: &[Value]) -> Option<Vec<f64>> {
    args.iter().map(to_number).collect()
}

/// Integral results become integers so they render as `3`, not `3.0`.
fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        float_value(value)
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn extract(collection: &Value, key: &Value) -> Value {
    let index = match key {
        Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
        Value::String(text) => text.trim().parse::<usize>().ok(),
        _ => None,
    };
    match collection {
        Value::Object(fields) => fields.get(&to_text(key)).cloned().unwrap_or(Value::Null),
        Value::Array(items) => match index {
            Some(i) => items.get(i).cloned().unwrap_or(Value::Null),
            None if matches!(key, Value::Number(_)) => Value::Null,
            None => {
                let key = to_text(key);
                Value::Array(
                    items
                        .iter()
                        .filter_map(|item| item.as_object()?.get(&key).cloned())
                        .collect(),
                )
            }
        },
        _ => Value::Null,
    }
}

/// printf-style formatting over JSON values: `%s %v %d %f %.Nf %x %q %t %%`.
pub fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = digits.parse().ok();
        }

        let Some(verb) = chars.next() else {
            out.push('%');
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };

        match verb {
            's' | 'v' | 't' => out.push_str(&to_text(arg)),
            'q' => out.push_str(&Value::String(to_text(arg)).to_string()),
            'd' => match to_number(arg) {
                Some(n) => out.push_str(&(n.trunc() as i64).to_string()),
                None => out.push_str(&format!("%!d({})", to_text(arg))),
            },
            'f' => match to_number(arg) {
                Some(n) => out.push_str(&format!("{:.*}", precision.unwrap_or(6), n)),
                None => out.push_str(&format!("%!f({})", to_text(arg))),
            },
            'x' => match arg {
                Value::Number(n) if n.as_i64().is_some() => {
                    out.push_str(&format!("{:x}", n.as_i64().unwrap_or_default()))
                }
                other => to_text(other)
                    .bytes()
                    .for_each(|b| out.push_str(&format!("{b:02x}"))),
            },
            other => out.push_str(&format!("%!{other}({})", to_text(arg))),
        }
    }

    out
}
