// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stub selection.
//!
//! Candidates are narrowed to one method and session, exhausted stubs are skipped, and every
//! remaining stub is evaluated against the request messages and headers. Survivors are ranked
//! by priority, then specificity, then insertion order (earliest wins). The winning stub's
//! usage is claimed atomically; if another call took its last use first, it is excluded
//! and the ranking is redone.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::compare::{self, Comparator};
use super::store::StoredStub;
use super::{InputData, Stub, StubStore};
use crate::convert::Map;
use crate::plugins::{CallContext, FunctionRegistry, MATCHER_HOOK_GROUP};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("service \"{0}\" not found")]
    ServiceNotFound(String),

    #[error("method \"{method}\" not found in service \"{service}\"")]
    MethodNotFound { service: String, method: String },

    /// Carries the full human-readable diagnostic
    #[error("{0}")]
    StubNotFound(String),
}

/// How the request messages are matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum QueryMode {
    /// One message; unary and server-streaming calls
    #[default]
    Unary,
    /// All messages of a finished client stream, matched against `inputs` positionally
    ClientStream,
    /// Message `index` of a bidirectional stream
    Bidi { index: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub service: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub headers: Map,
    pub messages: Vec<Map>,
    pub mode: QueryMode,
}

impl Query {
    pub fn unary(service: impl Into<String>, method: impl Into<String>, message: Map) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            messages: vec![message],
            ..Default::default()
        }
    }

    pub fn client_stream(
        service: impl Into<String>,
        method: impl Into<String>,
        messages: Vec<Map>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            messages,
            mode: QueryMode::ClientStream,
            ..Default::default()
        }
    }

    pub fn bidi(
        service: impl Into<String>,
        method: impl Into<String>,
        messages: Vec<Map>,
        index: usize,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            messages,
            mode: QueryMode::Bidi { index },
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session.filter(|s| !s.is_empty());
        self
    }

    pub fn with_headers(mut self, headers: Map) -> Self {
        self.headers = headers;
        self
    }

    /// Messages that take part in matching; a trailing empty client-stream message is dropped.
    fn effective_messages(&self) -> &[Map] {
        match (self.mode, self.messages.split_last()) {
            (QueryMode::ClientStream, Some((last, rest))) if last.is_empty() => rest,
            _ => self.messages.as_slice(),
        }
    }
}

/// The selected stub.
#[derive(Debug, Clone)]
pub struct Match {
    pub stub: Arc<Stub>,
    /// Use count including this call
    pub attempt: u64,
    /// Index of the message the stub matched, for single-input matches
    pub message_index: usize,
}

/// Specificity of a successful evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    fields: usize,
    strength: usize,
}

impl std::ops::Add for Score {
    type Output = Score;

    fn add(self, other: Score) -> Score {
        Score {
            fields: self.fields + other.fields,
            strength: self.strength + other.strength,
        }
    }
}

const EQUALS_STRENGTH: usize = 3;
const MATCHES_STRENGTH: usize = 2;
const CONTAINS_STRENGTH: usize = 1;

#[derive(Debug)]
pub struct Matcher {
    store: Arc<StubStore>,
    comparator: Comparator,
    functions: Option<Arc<FunctionRegistry>>,
}

impl Matcher {
    pub fn new(store: Arc<StubStore>) -> Self {
        Self {
            store,
            comparator: Comparator::new(),
            functions: None,
        }
    }

    /// Enables `matcher-hook` functions.
    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn store(&self) -> &Arc<StubStore> {
        &self.store
    }

    /// Selects a stub and claims one use of it.
    pub fn find(&self, query: &Query) -> Result<Match, MatchError> {
        let found = self.select(query, true)?;
        self.run_hooks(query, &found.stub);
        Ok(found)
    }

    /// Selects a stub without claiming a use.
    pub fn probe(&self, query: &Query) -> Result<Match, MatchError> {
        self.select(query, false)
    }

    fn select(&self, query: &Query, consume: bool) -> Result<Match, MatchError> {
        let candidates =
            self.store
                .candidates(&query.service, &query.method, query.session.as_deref());
        if !candidates.service_known {
            return Err(MatchError::ServiceNotFound(query.service.clone()));
        }
        if !candidates.method_known {
            return Err(MatchError::MethodNotFound {
                service: query.service.clone(),
                method: query.method.clone(),
            });
        }

        let limiter = self.store.limiter();
        let mut excluded: HashSet<Uuid> = HashSet::new();
        loop {
            let eligible: Vec<&StoredStub> = candidates
                .stubs
                .iter()
                .filter(|entry| !excluded.contains(&entry.stub.id))
                .filter(|entry| !limiter.is_exhausted(entry.stub.id, entry.stub.options.times))
                .collect();

            let Some((entry, message_index)) = self.rank(query, &eligible) else {
                return Err(MatchError::StubNotFound(
                    self.diagnostic(query, &candidates.stubs),
                ));
            };

            let stub = entry.stub.clone();
            if !consume {
                return Ok(Match {
                    attempt: limiter.count(stub.id) + 1,
                    stub,
                    message_index,
                });
            }
            match limiter.try_consume(stub.id, stub.options.times) {
                Some(attempt) => {
                    return Ok(Match {
                        stub,
                        attempt,
                        message_index,
                    })
                }
                None => {
                    excluded.insert(stub.id);
                }
            }
        }
    }

    fn rank<'a>(&self, query: &Query, eligible: &[&'a StoredStub]) -> Option<(&'a StoredStub, usize)> {
        let messages = query.effective_messages();
        let empty = Map::new();

        let best = |evaluate: &dyn Fn(&Stub) -> Option<(Score, usize)>| {
            eligible
                .iter()
                .filter_map(|entry| {
                    let header_score = self.score_headers(&entry.stub, &query.headers)?;
                    let (score, index) = evaluate(&entry.stub)?;
                    let total = score + header_score;
                    Some((
                        (entry.stub.priority, total, Reverse(entry.seq)),
                        *entry,
                        index,
                    ))
                })
                .max_by(|a, b| a.0.cmp(&b.0))
                .map(|(_, entry, index)| (entry, index))
        };

        match query.mode {
            QueryMode::Unary => {
                let message = messages.first().unwrap_or(&empty);
                best(&|stub| self.score_single(stub, message).map(|score| (score, 0)))
            }
            QueryMode::Bidi { index } => {
                let message = messages.get(index).unwrap_or(&empty);
                best(&|stub| {
                    let score = if stub.inputs.is_empty() {
                        self.score_single(stub, message)?
                    } else {
                        self.score_input(stub.inputs.get(index)?, message)?
                    };
                    Some((score, index))
                })
            }
            QueryMode::ClientStream => {
                let positional = best(&|stub| {
                    if stub.inputs.is_empty() || stub.inputs.len() != messages.len() {
                        return None;
                    }
                    stub.inputs
                        .iter()
                        .zip(messages)
                        .try_fold(Score::default(), |acc, (spec, message)| {
                            Some(acc + self.score_input(spec, message)?)
                        })
                        .map(|score| (score, messages.len().saturating_sub(1)))
                });
                if positional.is_some() {
                    return positional;
                }
                // single-input stubs, latest message first
                messages.iter().enumerate().rev().find_map(|(index, message)| {
                    best(&|stub| self.score_single(stub, message).map(|score| (score, index)))
                })
            }
        }
    }

    fn score_single(&self, stub: &Stub, message: &Map) -> Option<Score> {
        if stub.input.is_empty() {
            return None;
        }
        self.score_input(&stub.input, message)
    }

    fn score_input(&self, spec: &InputData, message: &Map) -> Option<Score> {
        let ignore = spec.ignore_array_order;
        let mut score = Score::default();
        if let Some(equals) = &spec.equals {
            if !self.comparator.equals_map(equals, message, ignore) {
                return None;
            }
            score = score + strategy_score(equals, EQUALS_STRENGTH);
        }
        if let Some(contains) = &spec.contains {
            if !self.comparator.contains_map(contains, message, ignore) {
                return None;
            }
            score = score + strategy_score(contains, CONTAINS_STRENGTH);
        }
        if let Some(matches) = &spec.matches {
            if !self.comparator.matches_map(matches, message) {
                return None;
            }
            score = score + strategy_score(matches, MATCHES_STRENGTH);
        }
        Some(score)
    }

    fn score_headers(&self, stub: &Stub, headers: &Map) -> Option<Score> {
        if stub.headers.is_empty() {
            return Some(Score::default());
        }
        let spec = InputData {
            ignore_array_order: false,
            equals: stub.headers.equals.as_ref().map(lowercase_keys),
            contains: stub.headers.contains.as_ref().map(lowercase_keys),
            matches: stub.headers.matches.as_ref().map(lowercase_keys),
        };
        self.score_input(&spec, headers)
    }

    fn run_hooks(&self, query: &Query, stub: &Stub) {
        let Some(functions) = &self.functions else {
            return;
        };
        let hooks = functions.hooks(MATCHER_HOOK_GROUP);
        if hooks.is_empty() {
            return;
        }
        let args = [
            serde_json::to_value(query).unwrap_or(Value::Null),
            serde_json::to_value(stub).unwrap_or(Value::Null),
        ];
        let ctx = CallContext {
            service: Some(query.service.clone()),
            method: Some(query.method.clone()),
            session: query.session.clone(),
            request_id: None,
        };
        for hook in hooks {
            if let Err(err) = hook(&ctx, &args) {
                tracing::warn!(stub_id = %stub.id, error = %err, "matcher hook failed");
            }
        }
    }

    /// Not-found text: the request and, when any candidate exists, the closest stub.
    fn diagnostic(&self, query: &Query, candidates: &[StoredStub]) -> String {
        let mut text = format!(
            "Can't find stub \n\nService: {} \n\nMethod: {} \n\n",
            query.service, query.method
        );
        let messages = query.effective_messages();
        match messages {
            [] => text.push_str("Input: (empty)\n\n"),
            [single] => {
                text.push_str("Input:\n\n");
                text.push_str(&pretty(single));
                text.push_str("\n\n");
            }
            many => {
                text.push_str("Stream Input (multiple messages):\n\n");
                for (i, message) in many.iter().enumerate() {
                    text.push_str(&format!("Message {i}:\n{}\n\n", pretty(message)));
                }
            }
        }

        let Some(closest) = self.closest(query, candidates) else {
            return text;
        };
        if closest.inputs.is_empty() {
            for (key, spec) in [
                ("equals", &closest.input.equals),
                ("contains", &closest.input.contains),
                ("matches", &closest.input.matches),
            ] {
                if let Some(map) = spec.as_ref().filter(|m| !m.is_empty()) {
                    text.push_str(&format!("\n\nClosest Match \n\n{key}:{}", pretty(map)));
                }
            }
        } else {
            for (i, spec) in closest.inputs.iter().enumerate() {
                let map = spec_as_map(spec);
                if !map.is_empty() {
                    text.push_str(&format!("\n\nClosest Match \n\nstream[{i}]:{}", pretty(&map)));
                }
            }
        }
        text
    }

    /// Highest field overlap, then highest text similarity.
    fn closest(&self, query: &Query, candidates: &[StoredStub]) -> Option<Arc<Stub>> {
        let messages = query.effective_messages();
        let request_text = serde_json::to_string(messages).unwrap_or_default();

        candidates
            .iter()
            .map(|entry| {
                let stub = &entry.stub;
                let (overlap, spec_text) = if stub.inputs.is_empty() {
                    let overlap = messages
                        .iter()
                        .map(|message| self.overlap(&stub.input, message))
                        .max()
                        .unwrap_or(0);
                    (overlap, serde_json::to_string(&stub.input).unwrap_or_default())
                } else {
                    let overlap = stub
                        .inputs
                        .iter()
                        .zip(messages)
                        .map(|(spec, message)| self.overlap(spec, message))
                        .sum::<usize>();
                    (overlap, serde_json::to_string(&stub.inputs).unwrap_or_default())
                };
                let similarity = strsim::normalized_levenshtein(&spec_text, &request_text);
                (overlap, similarity, Reverse(entry.seq), stub.clone())
            })
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then(a.1.total_cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            })
            .map(|(_, _, _, stub)| stub)
    }

    /// Number of individual expected fields the message satisfies.
    fn overlap(&self, spec: &InputData, message: &Map) -> usize {
        let ignore = spec.ignore_array_order;
        let count = |expected: &Option<Map>, holds: &dyn Fn(&Value, &Value) -> bool| {
            expected.iter().flatten().filter(|(key, want)| {
                message.get(key.as_str()).is_some_and(|got| holds(want, got))
            })
            .count()
        };
        count(&spec.equals, &|want, got| compare::equals(want, got, ignore))
            + count(&spec.contains, &|want, got| compare::contains(want, got, ignore))
            + count(&spec.matches, &|want, got| self.comparator.matches(want, got))
    }
}

fn strategy_score(map: &Map, strength: usize) -> Score {
    Score {
        fields: map.len(),
        strength: map.len() * strength,
    }
}

fn lowercase_keys(map: &Map) -> Map {
    map.iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value.clone()))
        .collect()
}

fn spec_as_map(spec: &InputData) -> Map {
    let mut map = Map::new();
    for (key, value) in [
        ("equals", &spec.equals),
        ("contains", &spec.contains),
        ("matches", &spec.matches),
    ] {
        if let Some(value) = value {
            map.insert(key.to_string(), Value::Object(value.clone()));
        }
    }
    map
}

/// Tab-indented JSON.
fn pretty(value: &impl Serialize) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
