// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::RouteDoc;
use crate::state::State;

pub fn health_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, "/api/health/liveness"),
        RouteDoc::new(Method::GET, "/api/health/readiness"),
    ];

    let router = Router::new()
        .route("/api/health/liveness", get(live_handler))
        .route("/api/health/readiness", get(ready_handler))
        .with_state(state);

    (docs, router)
}

async fn live_handler(
    axum::extract::State(_state): axum::extract::State<Arc<State>>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "live",
            "message": "Service is live"
        })),
    )
}

/// Ready once the gRPC listener is serving.
async fn ready_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> impl IntoResponse {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "services": state.descriptors().services().len(),
                "stubs": state.store().len(),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "notready",
                "message": "gRPC listener is not serving yet"
            })),
        )
    }
}
