// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Conversion between [`DynamicMessage`] and generic JSON maps.
//!
//! Decoding walks the populated fields of a message and turns every value into JSON:
//!
//! | field kind            | JSON                                             |
//! |-----------------------|--------------------------------------------------|
//! | 32/64-bit integers    | number (exact, no float round trip)              |
//! | float / double        | number, `"NaN"` / `"Infinity"` / `"-Infinity"`   |
//! | bool, string          | bool, string                                     |
//! | bytes                 | standard base64 string                           |
//! | enum                  | symbolic name (`NullValue` becomes `null`)       |
//! | message               | object keyed by proto field name                 |
//! | repeated / map        | array / object keyed by the stringified map key  |
//!
//! Encoding accepts everything decoding produces, plus the lenient forms stub authors and
//! templates produce: JSON (lowerCamel) field names, numbers in strings, `"true"`/`"false"`,
//! enum numbers and URL-safe base64.

use std::collections::HashMap;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, Value as ReflectValue,
};
use serde_json::{Number, Value};

pub type Map = serde_json::Map<String, Value>;

const NULL_VALUE: &str = "google.protobuf.NullValue";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConvertError {
    #[error("unknown field \"{field}\" in message {message}")]
    UnknownField { message: String, field: String },

    #[error("invalid value for field {field}: expected {expected}, got {got}")]
    InvalidValue {
        field: String,
        expected: &'static str,
        got: String,
    },

    #[error("unknown value \"{value}\" for enum {enum_name} (field {field})")]
    UnknownEnumValue {
        field: String,
        enum_name: String,
        value: String,
    },
}

/// Decode every populated field of `message` into a JSON object.
pub fn message_to_map(message: &DynamicMessage) -> Map {
    message
        .fields()
        .map(|(field, value)| (field.name().to_string(), field_to_json(&field, value)))
        .collect()
}

/// Build a message of type `descriptor` from a JSON object.
pub fn map_to_message(descriptor: &MessageDescriptor, map: &Map) -> Result<DynamicMessage, ConvertError> {
    let mut message = DynamicMessage::new(descriptor.clone());
    for (key, value) in map {
        let field = descriptor
            .get_field_by_name(key)
            .or_else(|| descriptor.get_field_by_json_name(key))
            .ok_or_else(|| ConvertError::UnknownField {
                message: descriptor.full_name().to_string(),
                field: key.clone(),
            })?;

        if value.is_null() && !is_null_value_enum(&field.kind()) {
            continue;
        }

        let converted = json_to_field(&field, value)?;
        message
            .try_set_field(&field, converted)
            .map_err(|e| ConvertError::InvalidValue {
                field: field.full_name().to_string(),
                expected: "a value matching the field type",
                got: e.to_string(),
            })?;
    }
    Ok(message)
}

fn is_null_value_enum(kind: &Kind) -> bool {
    matches!(kind, Kind::Enum(e) if e.full_name() == NULL_VALUE)
}

fn field_to_json(field: &FieldDescriptor, value: &ReflectValue) -> Value {
    let kind = field.kind();
    match value {
        ReflectValue::List(items) => {
            Value::Array(items.iter().map(|item| scalar_to_json(&kind, item)).collect())
        }
        ReflectValue::Map(entries) => {
            let value_kind = match &kind {
                Kind::Message(entry) => entry.map_entry_value_field().kind(),
                other => other.clone(),
            };
            let mut pairs: Vec<(String, Value)> = entries
                .iter()
                .map(|(key, value)| (map_key_to_string(key), scalar_to_json(&value_kind, value)))
                .collect();
            // map iteration order is unspecified, keep the output stable
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(pairs.into_iter().collect())
        }
        other => scalar_to_json(&kind, other),
    }
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

fn float_to_json(value: f64) -> Value {
    if value.is_nan() {
        Value::String("NaN".to_string())
    } else if value.is_infinite() {
        Value::String(if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn scalar_to_json(kind: &Kind, value: &ReflectValue) -> Value {
    match value {
        ReflectValue::Bool(b) => Value::Bool(*b),
        ReflectValue::I32(v) => Value::from(*v),
        ReflectValue::I64(v) => Value::from(*v),
        ReflectValue::U32(v) => Value::from(*v),
        ReflectValue::U64(v) => Value::from(*v),
        // the shortest f32 representation, not the widened f64 digits
        ReflectValue::F32(v) => float_to_json(v.to_string().parse::<f64>().unwrap_or(f64::from(*v))),
        ReflectValue::F64(v) => float_to_json(*v),
        ReflectValue::String(s) => Value::String(s.clone()),
        ReflectValue::Bytes(b) => Value::String(STANDARD.encode(b)),
        ReflectValue::EnumNumber(number) => match kind {
            Kind::Enum(e) if e.full_name() == NULL_VALUE => Value::Null,
            Kind::Enum(e) => e
                .get_value(*number)
                .map(|v| Value::String(v.name().to_string()))
                .unwrap_or_else(|| Value::from(*number)),
            _ => Value::from(*number),
        },
        ReflectValue::Message(message) => Value::Object(message_to_map(message)),
        ReflectValue::List(items) => {
            Value::Array(items.iter().map(|item| scalar_to_json(kind, item)).collect())
        }
        ReflectValue::Map(_) => Value::Null,
    }
}

fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 64 {
        format!("{}...", text.chars().take(64).collect::<String>())
    } else {
        text
    }
}

fn json_to_field(field: &FieldDescriptor, value: &Value) -> Result<ReflectValue, ConvertError> {
    let kind = field.kind();

    if field.is_map() {
        let Kind::Message(entry) = &kind else {
            return Err(invalid(field, "an object", value));
        };
        let Value::Object(object) = value else {
            return Err(invalid(field, "an object", value));
        };
        let key_kind = entry.map_entry_key_field().kind();
        let value_field = entry.map_entry_value_field();
        let mut map = HashMap::with_capacity(object.len());
        for (key, item) in object {
            let key = string_to_map_key(field, &key_kind, key)?;
            map.insert(key, json_to_scalar(field, &value_field.kind(), item)?);
        }
        return Ok(ReflectValue::Map(map));
    }

    if field.is_list() {
        let Value::Array(items) = value else {
            return Err(invalid(field, "an array", value));
        };
        return items
            .iter()
            .map(|item| json_to_scalar(field, &kind, item))
            .collect::<Result<Vec<_>, _>>()
            .map(ReflectValue::List);
    }

    json_to_scalar(field, &kind, value)
}

fn invalid(field: &FieldDescriptor, expected: &'static str, value: &Value) -> ConvertError {
    ConvertError::InvalidValue {
        field: field.full_name().to_string(),
        expected,
        got: describe(value),
    }
}

fn string_to_map_key(field: &FieldDescriptor, kind: &Kind, key: &str) -> Result<MapKey, ConvertError> {
    let text = Value::String(key.to_string());
    Ok(match kind {
        Kind::String => MapKey::String(key.to_string()),
        Kind::Bool => MapKey::Bool(to_bool(&text).ok_or_else(|| invalid(field, "a bool key", &text))?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MapKey::I32(to_int(field, &text)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MapKey::I64(to_int(field, &text)?),
        Kind::Uint32 | Kind::Fixed32 => MapKey::U32(to_int(field, &text)?),
        Kind::Uint64 | Kind::Fixed64 => MapKey::U64(to_int(field, &text)?),
        _ => return Err(invalid(field, "a scalar map key", &text)),
    })
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_int<T>(field: &FieldDescriptor, value: &Value) -> Result<T, ConvertError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let err = || invalid(field, "an integer in range", value);
    let from_f64 = |f: f64| -> Result<T, ConvertError> {
        if f.fract() != 0.0 || !f.is_finite() {
            return Err(err());
        }
        // `as` saturates, so anything outside the 64-bit range is rejected first
        if f < 0.0 {
            if f < i64::MIN as f64 {
                return Err(err());
            }
            T::try_from(f as i64).map_err(|_| err())
        } else {
            if f >= u64::MAX as f64 {
                return Err(err());
            }
            T::try_from(f as u64).map_err(|_| err())
        }
    };

    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                T::try_from(i).map_err(|_| err())
            } else if let Some(u) = n.as_u64() {
                T::try_from(u).map_err(|_| err())
            } else {
                from_f64(n.as_f64().ok_or_else(err)?)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                T::try_from(i).map_err(|_| err())
            } else if let Ok(u) = s.parse::<u64>() {
                T::try_from(u).map_err(|_| err())
            } else {
                from_f64(s.parse::<f64>().map_err(|_| err())?)
            }
        }
        _ => Err(err()),
    }
}

fn to_float(field: &FieldDescriptor, value: &Value) -> Result<f64, ConvertError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(field, "a number", value)),
        Value::String(s) => match s.trim() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_err(|_| invalid(field, "a number", value)),
        },
        _ => Err(invalid(field, "a number", value)),
    }
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
}

fn json_to_scalar(field: &FieldDescriptor, kind: &Kind, value: &Value) -> Result<ReflectValue, ConvertError> {
    Ok(match kind {
        Kind::Double => ReflectValue::F64(to_float(field, value)?),
        Kind::Float => ReflectValue::F32(to_float(field, value)? as f32),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => ReflectValue::I32(to_int(field, value)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => ReflectValue::I64(to_int(field, value)?),
        Kind::Uint32 | Kind::Fixed32 => ReflectValue::U32(to_int(field, value)?),
        Kind::Uint64 | Kind::Fixed64 => ReflectValue::U64(to_int(field, value)?),
        Kind::Bool => ReflectValue::Bool(to_bool(value).ok_or_else(|| invalid(field, "a bool", value))?),
        Kind::String => match value {
            Value::String(s) => ReflectValue::String(s.clone()),
            Value::Number(n) => ReflectValue::String(n.to_string()),
            Value::Bool(b) => ReflectValue::String(b.to_string()),
            _ => return Err(invalid(field, "a string", value)),
        },
        Kind::Bytes => {
            let Value::String(s) = value else {
                return Err(invalid(field, "a base64 string", value));
            };
            ReflectValue::Bytes(
                decode_base64(s)
                    .ok_or_else(|| invalid(field, "a base64 string", value))?
                    .into(),
            )
        }
        Kind::Enum(e) => match value {
            Value::Null if e.full_name() == NULL_VALUE => ReflectValue::EnumNumber(0),
            Value::String(name) => ReflectValue::EnumNumber(
                e.get_value_by_name(name)
                    .map(|v| v.number())
                    .or_else(|| name.trim().parse::<i32>().ok())
                    .ok_or_else(|| ConvertError::UnknownEnumValue {
                        field: field.full_name().to_string(),
                        enum_name: e.full_name().to_string(),
                        value: name.clone(),
                    })?,
            ),
            Value::Number(_) => ReflectValue::EnumNumber(to_int(field, value)?),
            _ => return Err(invalid(field, "an enum name or number", value)),
        },
        Kind::Message(descriptor) => {
            let Value::Object(object) = value else {
                return Err(invalid(field, "an object", value));
            };
            ReflectValue::Message(map_to_message(descriptor, object)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use prost::Message;
    use rstest::rstest;
    use serde_json::json;

    fn scalars() -> MessageDescriptor {
        testing::greeter_pool()
            .get_message_by_name("helloworld.Scalars")
            .unwrap()
    }

    fn object(value: Value) -> Map {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn kitchen_sink() -> Value {
        json!({
            "d": 1.5,
            "f": 0.1,
            "i32": -42,
            "i64": 9223372036854775807i64,
            "u32": 4294967295u32,
            "u64": 18446744073709551615u64,
            "s32": -7,
            "s64": -9007199254740993i64,
            "fx32": 7,
            "fx64": 8,
            "sfx32": -9,
            "sfx64": -10,
            "flag": true,
            "text": "héllo",
            "raw": "AAEC/w==",
            "mood": "SAD",
            "nested": {"message": "inner", "count": 3},
            "replies": [{"message": "a"}, {"message": "b", "tags": ["x", "y"]}],
            "by_id": {"1": {"message": "one"}, "2": {"message": "two"}},
            "numbers": [1, -2, 9007199254740993i64]
        })
    }

    #[test]
    fn test_round_trip_every_kind() {
        let desc = scalars();
        let input = object(kitchen_sink());
        let message = map_to_message(&desc, &input).unwrap();
        let decoded = message_to_map(&message);
        assert_eq!(Value::Object(decoded.clone()), kitchen_sink());

        // and back onto the wire
        let again = map_to_message(&desc, &decoded).unwrap();
        assert_eq!(again, message);
        let bytes = message.encode_to_vec();
        let from_wire = DynamicMessage::decode(desc, bytes.as_slice()).unwrap();
        assert_eq!(message_to_map(&from_wire), decoded);
    }

    #[test]
    fn test_large_integers_are_exact() {
        let message = map_to_message(
            &scalars(),
            &object(json!({"i64": "9223372036854775807", "u64": "18446744073709551615"})),
        )
        .unwrap();
        let decoded = message_to_map(&message);
        assert_eq!(decoded["i64"].as_i64(), Some(i64::MAX));
        assert_eq!(decoded["u64"].as_u64(), Some(u64::MAX));
    }

    #[test]
    fn test_default_values_are_omitted() {
        let message = map_to_message(&scalars(), &object(json!({"i32": 0, "text": ""}))).unwrap();
        assert!(message_to_map(&message).is_empty());
    }

    #[test]
    fn test_lenient_inputs() {
        let message = map_to_message(
            &scalars(),
            &object(json!({
                "i32": "12",
                "d": "2.5",
                "flag": "true",
                "mood": 1,
                "raw": "AAEC_w",
                "text": 15,
                "byId": {"7": {"message": "seven"}},
                "numbers": ["3", 4.0]
            })),
        )
        .unwrap();
        let decoded = message_to_map(&message);
        assert_eq!(decoded["i32"], json!(12));
        assert_eq!(decoded["d"], json!(2.5));
        assert_eq!(decoded["flag"], json!(true));
        assert_eq!(decoded["mood"], json!("HAPPY"));
        assert_eq!(decoded["raw"], json!("AAEC/w=="));
        assert_eq!(decoded["text"], json!("15"));
        assert_eq!(decoded["by_id"], json!({"7": {"message": "seven"}}));
        assert_eq!(decoded["numbers"], json!([3, 4]));
    }

    #[test]
    fn test_special_floats() {
        let message = map_to_message(
            &scalars(),
            &object(json!({"d": "NaN", "f": "-Infinity"})),
        )
        .unwrap();
        let decoded = message_to_map(&message);
        assert_eq!(decoded["d"], json!("NaN"));
        assert_eq!(decoded["f"], json!("-Infinity"));
    }

    #[test]
    fn test_null_fields_are_skipped() {
        let message = map_to_message(&scalars(), &object(json!({"text": null}))).unwrap();
        assert!(message_to_map(&message).is_empty());
    }

    #[test]
    fn test_errors() {
        let desc = scalars();
        assert!(matches!(
            map_to_message(&desc, &object(json!({"nope": 1}))),
            Err(ConvertError::UnknownField { .. })
        ));
        assert!(matches!(
            map_to_message(&desc, &object(json!({"i32": 4294967296u64}))),
            Err(ConvertError::InvalidValue { .. })
        ));
        assert!(matches!(
            map_to_message(&desc, &object(json!({"i32": 1.5}))),
            Err(ConvertError::InvalidValue { .. })
        ));
        assert!(matches!(
            map_to_message(&desc, &object(json!({"mood": "ANGRY"}))),
            Err(ConvertError::UnknownEnumValue { .. })
        ));
        assert!(matches!(
            map_to_message(&desc, &object(json!({"raw": "***"}))),
            Err(ConvertError::InvalidValue { .. })
        ));
        assert!(matches!(
            map_to_message(&desc, &object(json!({"nested": "flat"}))),
            Err(ConvertError::InvalidValue { .. })
        ));
    }

    #[rstest]
    #[case(json!({"u64": 1e20}))]
    #[case(json!({"u64": "1e20"}))]
    #[case(json!({"u64": -1.0}))]
    #[case(json!({"i64": -1e20}))]
    #[case(json!({"i64": 1e19}))]
    #[case(json!({"u32": 5e9}))]
    fn test_out_of_range_floats_are_rejected(#[case] input: Value) {
        assert!(matches!(
            map_to_message(&scalars(), &object(input)),
            Err(ConvertError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_whole_floats_fit_integers() {
        let message = map_to_message(&scalars(), &object(json!({"u64": 1e19, "i64": -1e18}))).unwrap();
        let decoded = message_to_map(&message);
        assert_eq!(decoded["u64"].as_u64(), Some(10_000_000_000_000_000_000));
        assert_eq!(decoded["i64"].as_i64(), Some(-1_000_000_000_000_000_000));
    }
}
