// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admin REST surface: stub management, search, descriptors, history and probes.
//!
//! Every router function returns its [`RouteDoc`]s next to the `axum` router so the full
//! route table can be logged at start-up.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::SESSION_HEADER;
use crate::state::State;

pub mod health;
pub mod history;
pub mod services;
pub mod stubs;

/// One documented route, displayed as `METHOD /path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDoc {
    method: Method,
    path: String,
}

impl RouteDoc {
    pub fn new<T: Into<String>>(method: Method, path: T) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RouteDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error answered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// The session named by the request, if any. Seeing a session keeps it alive.
pub(crate) fn request_session(state: &State, headers: &HeaderMap) -> Option<String> {
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)?;
    state.sessions().touch(&session);
    Some(session)
}

/// Every admin route.
pub fn router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let mut docs = Vec::new();
    let mut app = Router::new();
    for (route_docs, route) in [
        stubs::stubs_router(state.clone()),
        services::services_router(state.clone()),
        history::history_router(state.clone()),
        health::health_router(state),
    ] {
        docs.extend(route_docs);
        app = app.merge(route);
    }

    let app = app.fallback(|| async {
        tracing::debug!("[fallback handler] called");
        ApiError::not_found("route not found")
    });
    (docs, app)
}

/// Binds the admin listener and serves it in the background until `cancel_token` fires.
pub async fn spawn_admin_server(
    host: &str,
    port: u16,
    cancel_token: CancellationToken,
    state: Arc<State>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let address = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to address {}: {}", address, e);
            return Err(anyhow::anyhow!("Failed to bind to address: {}", e));
        }
    };
    serve_admin(listener, cancel_token, state)
}

/// Serves the admin surface on an already bound listener.
pub fn serve_admin(
    listener: TcpListener,
    cancel_token: CancellationToken,
    state: Arc<State>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let actual_address = listener.local_addr()?;
    let (docs, app) = router(state);
    for doc in &docs {
        tracing::debug!(route = %doc, "admin route");
    }
    tracing::info!(address = %actual_address, routes = docs.len(), "Admin API bound");

    let observer = cancel_token.child_token();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
        {
            tracing::error!("Admin server error: {}", e);
        }
    });

    Ok((actual_address, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_doc_display() {
        let doc = RouteDoc::new(Method::POST, "/api/stubs");
        assert_eq!(doc.to_string(), "POST /api/stubs");
        assert_eq!(doc.path(), "/api/stubs");
    }

    #[test]
    fn test_router_documents_every_route() {
        let state = Arc::new(crate::testing::greeter_state());
        let (docs, _router) = router(state);
        let rendered: Vec<String> = docs.iter().map(ToString::to_string).collect();
        for expected in [
            "POST /api/stubs",
            "GET /api/stubs",
            "DELETE /api/stubs",
            "POST /api/stubs/batchDelete",
            "POST /api/stubs/search",
            "GET /api/stubs/used",
            "GET /api/stubs/unused",
            "GET /api/stubs/{id}",
            "DELETE /api/stubs/{id}",
            "GET /api/services",
            "GET /api/services/{service}/methods",
            "GET /api/history",
            "POST /api/verify",
            "GET /api/health/liveness",
            "GET /api/health/readiness",
        ] {
            assert!(rendered.contains(&expected.to_string()), "missing {expected}");
        }
    }
}
