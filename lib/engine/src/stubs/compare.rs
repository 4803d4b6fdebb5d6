// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Field comparison strategies used by the matcher.
//!
//! - `equals`: deep equality. Numbers compare by value across integer and float forms, and a
//!   numeric string equals the number it spells. A key missing from the request equals its
//!   proto3 default, since defaults are never decoded.
//! - `contains`: substring for strings, subset for objects, ordered subsequence for arrays.
//! - `matches`: anchored regular expression per string leaf.
//!
//! `ignore_order` turns array comparisons into multiset comparisons at every depth.

use dashmap::DashMap;
use regex::Regex;
use serde_json::{Number, Value};

use crate::convert::Map;

/// Compiled pattern cache; invalid patterns are cached as `None` and never match.
#[derive(Debug, Default)]
pub struct Comparator {
    patterns: DashMap<String, Option<Regex>>,
}

impl Comparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every expected key is present in `actual` and deep-equal.
    pub fn equals_map(&self, expected: &Map, actual: &Map, ignore_order: bool) -> bool {
        expected.iter().all(|(key, want)| match actual.get(key) {
            Some(got) => equals(want, got, ignore_order),
            None => is_default(want),
        })
    }

    pub fn contains_map(&self, expected: &Map, actual: &Map, ignore_order: bool) -> bool {
        expected.iter().all(|(key, want)| match actual.get(key) {
            Some(got) => contains(want, got, ignore_order),
            None => is_default(want),
        })
    }

    pub fn matches_map(&self, expected: &Map, actual: &Map) -> bool {
        expected.iter().all(|(key, pattern)| match actual.get(key) {
            Some(got) => self.matches(pattern, got),
            None => match pattern {
                Value::String(p) => self.is_full_match(p, ""),
                other => is_default(other),
            },
        })
    }

    pub fn matches(&self, pattern: &Value, actual: &Value) -> bool {
        match (pattern, actual) {
            (_, Value::Bool(_)) if pattern.is_string() => false,
            (Value::String(p), Value::String(text)) => self.is_full_match(p, text),
            (Value::String(p), Value::Number(n)) => self.is_full_match(p, &n.to_string()),
            (Value::String(_), _) => false,
            (Value::Object(patterns), Value::Object(fields)) => self.matches_map(patterns, fields),
            (Value::Array(patterns), Value::Array(items)) => {
                patterns.len() == items.len()
                    && patterns.iter().zip(items).all(|(p, item)| self.matches(p, item))
            }
            (other, actual) => equals(other, actual, false),
        }
    }

    fn is_full_match(&self, pattern: &str, text: &str) -> bool {
        if let Some(cached) = self.patterns.get(pattern) {
            return cached.as_ref().is_some_and(|re| re.is_match(text));
        }
        let compiled = Regex::new(&format!("^(?:{pattern})$")).ok();
        if compiled.is_none() {
            tracing::warn!(pattern, "invalid regular expression in stub; it never matches");
        }
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(text));
        self.patterns.insert(pattern.to_string(), compiled);
        matched
    }
}

pub fn equals(expected: &Value, actual: &Value, ignore_order: bool) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::String(text), Value::Number(n)) | (Value::Number(n), Value::String(text)) => {
            numeric_text_equals(text, n)
        }
        (Value::Object(want), Value::Object(got)) => {
            want.iter().all(|(key, value)| match got.get(key) {
                Some(other) => equals(value, other, ignore_order),
                None => is_default(value),
            }) && got
                .iter()
                .all(|(key, value)| want.contains_key(key) || is_default(value))
        }
        (Value::Array(want), Value::Array(got)) => {
            want.len() == got.len()
                && if ignore_order {
                    pair_all(want, got, |a, b| equals(a, b, true))
                } else {
                    want.iter().zip(got).all(|(a, b)| equals(a, b, false))
                }
        }
        _ => false,
    }
}

pub fn contains(expected: &Value, actual: &Value, ignore_order: bool) -> bool {
    match (expected, actual) {
        (Value::String(needle), Value::String(haystack)) => haystack.contains(needle.as_str()),
        (Value::String(needle), Value::Number(n)) => n.to_string().contains(needle.as_str()),
        (Value::Object(want), Value::Object(got)) => want.iter().all(|(key, value)| {
            got.get(key)
                .is_some_and(|other| contains(value, other, ignore_order))
        }),
        (Value::Array(want), Value::Array(got)) => {
            if ignore_order {
                want.len() <= got.len() && pair_all(want, got, |a, b| contains(a, b, true))
            } else {
                let mut rest = got.iter();
                want.iter()
                    .all(|item| rest.any(|other| contains(item, other, false)))
            }
        }
        _ => equals(expected, actual, ignore_order),
    }
}

/// Pairs every element of `want` with a distinct element of `got` it is `same` as. Pairs are
/// found along augmenting paths, so an early element never blocks a later one.
fn pair_all(want: &[Value], got: &[Value], same: impl Fn(&Value, &Value) -> bool) -> bool {
    if want.len() > got.len() {
        return false;
    }
    let candidates: Vec<Vec<usize>> = want
        .iter()
        .map(|item| {
            got.iter()
                .enumerate()
                .filter(|(_, other)| same(item, other))
                .map(|(slot, _)| slot)
                .collect()
        })
        .collect();

    let mut owners = vec![None; got.len()];
    (0..want.len()).all(|item| {
        let mut visited = vec![false; got.len()];
        assign(item, &candidates, &mut owners, &mut visited)
    })
}

fn assign(
    item: usize,
    candidates: &[Vec<usize>],
    owners: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for &slot in &candidates[item] {
        if visited[slot] {
            continue;
        }
        visited[slot] = true;
        let free = match owners[slot] {
            None => true,
            Some(owner) => assign(owner, candidates, owners, visited),
        };
        if free {
            owners[slot] = Some(item);
            return true;
        }
    }
    false
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn numeric_text_equals(text: &str, number: &Number) -> bool {
    let text = text.trim();
    if let Ok(parsed) = text.parse::<i64>() {
        return number.as_i64() == Some(parsed)
            || number.as_f64().is_some_and(|f| f == parsed as f64 && f.fract() == 0.0);
    }
    if let Ok(parsed) = text.parse::<u64>() {
        return number.as_u64() == Some(parsed);
    }
    match (text.parse::<f64>(), number.as_f64()) {
        (Ok(x), Some(y)) => x == y,
        _ => false,
    }
}

/// proto3 zero values, which never appear in a decoded message.
pub fn is_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn map(value: Value) -> Map {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[rstest]
    #[case(json!(1), json!(1.0), true)]
    #[case(json!("42"), json!(42), true)]
    #[case(json!(42), json!("42"), true)]
    #[case(json!("4.5"), json!(4.5), true)]
    #[case(json!("abc"), json!(42), false)]
    #[case(json!(u64::MAX), json!(u64::MAX), true)]
    #[case(json!(9007199254740993_i64), json!(9007199254740992_i64), false)]
    #[case(json!([1, 2]), json!([2, 1]), false)]
    #[case(json!({"a": {"b": [1]}}), json!({"a": {"b": [1]}}), true)]
    #[case(json!({"a": 1}), json!({"a": 1, "b": 2}), false)]
    #[case(json!({"a": 1, "b": 0}), json!({"a": 1}), true)]
    #[case(json!(true), json!("true"), false)]
    fn test_equals(#[case] expected: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(equals(&expected, &actual, false), result, "{expected} vs {actual}");
    }

    #[test]
    fn test_equals_ignore_order() {
        assert!(equals(&json!([1, 2, 2]), &json!([2, 1, 2]), true));
        assert!(!equals(&json!([1, 2, 2]), &json!([2, 1, 1]), true));
        assert!(equals(
            &json!({"a": [[1, 2], [3]]}),
            &json!({"a": [[3], [2, 1]]}),
            true
        ));
    }

    #[rstest]
    #[case(json!("lex"), json!("Alex"), true)]
    #[case(json!("bob"), json!("Alex"), false)]
    #[case(json!({"a": "x"}), json!({"a": "xyz", "b": 1}), true)]
    #[case(json!([1, 3]), json!([1, 2, 3]), true)]
    #[case(json!([3, 1]), json!([1, 2, 3]), false)]
    #[case(json!(5), json!(5.0), true)]
    #[case(json!("23"), json!(1234), true)]
    fn test_contains(#[case] expected: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(contains(&expected, &actual, false), result, "{expected} vs {actual}");
    }

    #[rstest]
    #[case(json!([3, 1]), json!([1, 2, 3]), true)]
    #[case(json!([3, 3]), json!([1, 2, 3]), false)]
    #[case(json!(["a", "ab"]), json!(["ab", "a"]), true)]
    #[case(json!(["a", "ab"]), json!(["ab", "b"]), false)]
    #[case(json!([{"k": 1}, {"k": 1, "v": 2}]), json!([{"k": 1, "v": 2}, {"k": 1}]), true)]
    #[case(json!([["x"], ["x", "y"]]), json!([["y", "x"], ["x"]]), true)]
    fn test_contains_ignore_order(#[case] expected: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(contains(&expected, &actual, true), result, "{expected} vs {actual}");
    }

    #[test]
    fn test_matches() {
        let cmp = Comparator::new();
        assert!(cmp.matches(&json!("^A.*x$"), &json!("Alex")));
        assert!(cmp.matches(&json!("A.*"), &json!("Alex")));
        // patterns are anchored
        assert!(!cmp.matches(&json!("le"), &json!("Alex")));
        assert!(cmp.matches(&json!("\\d+"), &json!(123)));
        assert!(!cmp.matches(&json!("true"), &json!(true)));
        assert!(!cmp.matches(&json!("(unclosed"), &json!("(unclosed")));
        assert!(cmp.matches(&json!({"inner": "[a-z]+"}), &json!({"inner": "abc"})));
        assert!(cmp.matches(&json!(["a.", "b."]), &json!(["ax", "by"])));
        assert!(!cmp.matches(&json!(["a."]), &json!(["ax", "by"])));
    }

    #[test]
    fn test_map_helpers() {
        let cmp = Comparator::new();
        let actual = map(json!({"name": "Alex", "count": 3}));
        assert!(cmp.equals_map(&Map::new(), &actual, false));
        assert!(cmp.equals_map(&map(json!({"name": "Alex"})), &actual, false));
        assert!(cmp.equals_map(&map(json!({"name": "Alex", "mood": ""})), &actual, false));
        assert!(!cmp.equals_map(&map(json!({"name": "Bob"})), &actual, false));
        assert!(cmp.contains_map(&map(json!({"name": "le"})), &actual, false));
        assert!(!cmp.contains_map(&map(json!({"missing": "x"})), &actual, false));
        assert!(cmp.matches_map(&map(json!({"name": "[A-Z]lex", "count": "\\d"})), &actual));
        assert!(cmp.matches_map(&map(json!({"missing": ".*"})), &actual));
    }
}
