// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{request_session, ApiError, RouteDoc};
use crate::history::CallRecord;
use crate::state::State;

pub fn history_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, "/api/history"),
        RouteDoc::new(Method::POST, "/api/verify"),
    ];

    let router = Router::new()
        .route("/api/history", get(history_handler))
        .route("/api/verify", post(verify_handler))
        .with_state(state);

    (docs, router)
}

async fn history_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
) -> Json<Vec<CallRecord>> {
    let session = request_session(&state, &headers);
    Json(state.history().filter(None, None, session.as_deref()))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub service: String,
    pub method: String,
    pub expected_count: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub message: String,
    pub actual_count: usize,
}

/// Asserts how many times a method was called.
async fn verify_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let session = request_session(&state, &headers);
    let actual = state
        .history()
        .filter(Some(&request.service), Some(&request.method), session.as_deref())
        .len();
    if actual != request.expected_count {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!(
                "expected {}/{} to be called {} times, got {}",
                request.service, request.method, request.expected_count, actual
            ),
        ));
    }
    Ok(Json(VerifyResponse {
        message: "ok".to_string(),
        actual_count: actual,
    }))
}
