// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::Path;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{request_session, ApiError, RouteDoc};
use crate::convert::Map;
use crate::plugins::CallContext;
use crate::render::{Reply, StreamIndex};
use crate::state::State;
use crate::stubs::{Query, Stub};
use crate::template::TemplateData;

pub fn stubs_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::POST, "/api/stubs"),
        RouteDoc::new(Method::GET, "/api/stubs"),
        RouteDoc::new(Method::DELETE, "/api/stubs"),
        RouteDoc::new(Method::POST, "/api/stubs/batchDelete"),
        RouteDoc::new(Method::POST, "/api/stubs/search"),
        RouteDoc::new(Method::GET, "/api/stubs/used"),
        RouteDoc::new(Method::GET, "/api/stubs/unused"),
        RouteDoc::new(Method::GET, "/api/stubs/{id}"),
        RouteDoc::new(Method::DELETE, "/api/stubs/{id}"),
    ];

    let router = Router::new()
        .route(
            "/api/stubs",
            post(add_stubs_handler)
                .get(list_stubs_handler)
                .delete(purge_stubs_handler),
        )
        .route("/api/stubs/batchDelete", post(batch_delete_handler))
        .route("/api/stubs/search", post(search_handler))
        .route("/api/stubs/used", get(used_stubs_handler))
        .route("/api/stubs/unused", get(unused_stubs_handler))
        .route(
            "/api/stubs/{id}",
            get(get_stub_handler).delete(delete_stub_handler),
        )
        .with_state(state);

    (docs, router)
}

/// A single stub or an array of stubs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StubsPayload {
    Many(Vec<Stub>),
    One(Box<Stub>),
}

async fn add_stubs_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Vec<Uuid>>, ApiError> {
    let payload: StubsPayload = serde_json::from_value(payload)
        .map_err(|err| ApiError::bad_request(format!("invalid stub payload: {err}")))?;
    let mut stubs = match payload {
        StubsPayload::Many(stubs) => stubs,
        StubsPayload::One(stub) => vec![*stub],
    };

    if let Some(session) = request_session(&state, &headers) {
        for stub in stubs.iter_mut().filter(|stub| stub.session.is_none()) {
            stub.session = Some(session.clone());
        }
    }

    let ids = state
        .store()
        .put_many(stubs)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    tracing::debug!(stubs = ids.len(), "stubs added");
    Ok(Json(ids))
}

async fn list_stubs_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
) -> Json<Vec<Stub>> {
    let session = request_session(&state, &headers);
    Json(owned(state.store().list(session.as_deref())))
}

async fn used_stubs_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
) -> Json<Vec<Stub>> {
    let session = request_session(&state, &headers);
    Json(owned(state.store().used(session.as_deref())))
}

async fn unused_stubs_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
) -> Json<Vec<Stub>> {
    let session = request_session(&state, &headers);
    Json(owned(state.store().unused(session.as_deref())))
}

async fn purge_stubs_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> StatusCode {
    state.store().clear();
    tracing::debug!("stubs purged");
    StatusCode::NO_CONTENT
}

async fn batch_delete_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Json(ids): Json<Vec<Uuid>>,
) -> StatusCode {
    let deleted = state.store().delete_by_id(&ids);
    tracing::debug!(requested = ids.len(), deleted = deleted.len(), "stubs deleted");
    StatusCode::NO_CONTENT
}

async fn get_stub_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Stub>, ApiError> {
    state
        .store()
        .find_by_id(id)
        .map(|stub| Json(Stub::clone(&stub)))
        .ok_or_else(|| ApiError::not_found(format!("stub {id} not found")))
}

async fn delete_stub_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.store().delete_by_id(&[id]).is_empty() {
        return Err(ApiError::not_found(format!("stub {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub headers: Map,
    #[serde(default)]
    pub data: Map,
}

/// A rendered stub output, as the call would have seen it.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<Map>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

/// Runs the match and render pipeline without claiming a use of the stub.
async fn search_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let session = request_session(&state, &headers);
    let query = Query::unary(&request.service, &request.method, request.data.clone())
        .with_session(session.clone())
        .with_headers(lowercase_keys(request.headers.clone()));

    let found = state
        .matcher()
        .probe(&query)
        .map_err(|err| ApiError::not_found(err.to_string()))?;

    let request_id = Uuid::new_v4();
    let data = TemplateData {
        request: request.data.clone(),
        requests: vec![Value::Object(request.data)],
        headers: request.headers,
        stub_id: found.stub.id,
        request_id,
        attempt_number: found.attempt,
        max_attempts: found.stub.options.times,
        ..Default::default()
    };
    let call = CallContext::for_call(&request.service, &request.method, session.as_deref(), request_id);
    let rendered = state
        .renderer()
        .render(&found.stub.output, call, &data, StreamIndex::PerElement)
        .map_err(|err| ApiError::internal(err.to_string()))?;

    let mut response = SearchResponse {
        id: found.stub.id,
        headers: rendered.headers,
        ..Default::default()
    };
    match rendered.reply {
        Reply::Message(map) => response.data = Some(map),
        Reply::Stream(items) => response.stream = items,
        Reply::Failure { code, message } => {
            response.error = message;
            response.code = Some(code as i32);
        }
    }
    Ok(Json(response))
}

fn owned(stubs: Vec<Arc<Stub>>) -> Vec<Stub> {
    stubs.iter().map(|stub| Stub::clone(stub)).collect()
}

fn lowercase_keys(map: Map) -> Map {
    map.into_iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}
