// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::Path;
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};

use super::{ApiError, RouteDoc};
use crate::descriptors::{MethodInfo, ServiceInfo};
use crate::state::State;

pub fn services_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, "/api/services"),
        RouteDoc::new(Method::GET, "/api/services/{service}/methods"),
    ];

    let router = Router::new()
        .route("/api/services", get(list_services_handler))
        .route("/api/services/{service}/methods", get(list_methods_handler))
        .with_state(state);

    (docs, router)
}

async fn list_services_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> Json<Vec<ServiceInfo>> {
    Json(state.descriptors().service_infos())
}

async fn list_methods_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<MethodInfo>>, ApiError> {
    state
        .descriptors()
        .methods(&service)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("service {service} not found")))
}
