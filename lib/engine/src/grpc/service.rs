// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The catch-all gRPC service. Each request path is resolved against the descriptor registry
//! and served by the handler matching the method's shape.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE};
use tonic::body::Body;
use tonic::server::Grpc;
use tonic::Status;

use super::codec::DynamicCodec;
use super::handlers::{Bidi, ClientStream, MethodHandler, ServerStream, Unary};
use crate::state::State;

#[derive(Debug, Clone)]
pub struct DynamicService {
    state: Arc<State>,
}

impl DynamicService {
    pub fn new(state: Arc<State>) -> Self {
        Self { state }
    }
}

impl tower::Service<http::Request<axum::body::Body>> for DynamicService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<axum::body::Body>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move { Ok(dispatch(state, request).await) })
    }
}

async fn dispatch(state: Arc<State>, request: http::Request<axum::body::Body>) -> http::Response<Body> {
    let path = request.uri().path().to_string();
    let Some(method) = state.descriptors().find_method(&path) else {
        tracing::debug!(path = %path, "unknown gRPC method");
        return status_response(Status::unimplemented(format!("unknown method {path}")));
    };

    let mut grpc = Grpc::new(DynamicCodec::new(method.input()));
    let handler = MethodHandler::new(state, method.clone());
    match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => grpc.unary(Unary(handler), request).await,
        (false, true) => grpc.server_streaming(ServerStream(handler), request).await,
        (true, false) => grpc.client_streaming(ClientStream(handler), request).await,
        (true, true) => grpc.streaming(Bidi(handler), request).await,
    }
}

/// A trailers-only response carrying `status`.
fn status_response(status: Status) -> http::Response<Body> {
    let mut response = http::Response::new(Body::empty());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if let Err(err) = status.add_header(response.headers_mut()) {
        tracing::warn!(error = %err, "failed to encode gRPC status");
    }
    response
}
