// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-method call handlers for the four call shapes.
//!
//! Every call decodes its messages into maps, asks the matcher for a stub, renders the stub
//! output and encodes the reply with the method's output descriptor. The served call is then
//! recorded in history and handed to `runtime-hook` functions, including calls the client
//! abandons half way.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::Stream;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use serde_json::Value;
use tonic::metadata::MetadataMap;
use tonic::server::{
    ClientStreamingService, ServerStreamingService, StreamingService, UnaryService,
};
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use super::metadata::{request_headers, response_metadata, session};
use crate::convert::{map_to_message, message_to_map, Map};
use crate::history::CallRecord;
use crate::plugins::{CallContext, RUNTIME_HOOK_GROUP};
use crate::render::{Rendered, Reply, StreamIndex};
use crate::state::State;
use crate::stubs::{Query, Stub};
use crate::template::TemplateData;

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send + 'static>>;

/// What one call knows about itself before any stub is chosen.
#[derive(Debug, Clone)]
struct CallScope {
    service: String,
    method: String,
    session: Option<String>,
    headers: Map,
    request_id: Uuid,
    request_time: DateTime<Utc>,
    started: Instant,
}

impl CallScope {
    fn call_context(&self) -> CallContext {
        CallContext::for_call(
            &self.service,
            &self.method,
            self.session.as_deref(),
            self.request_id,
        )
    }

    fn unary_query(&self, message: Map) -> Query {
        Query::unary(&self.service, &self.method, message)
            .with_session(self.session.clone())
            .with_headers(self.headers.clone())
    }

    fn record(&self) -> CallRecord {
        CallRecord {
            session: self.session.clone(),
            timestamp: self.request_time,
            ..CallRecord::new(&self.service, &self.method)
        }
    }
}

/// Error recorded for a call the client dropped before it completed.
pub const CANCELLED: &str = "cancelled";

/// The history record of a call in flight. It is recorded on [`PendingCall::complete`], or on
/// drop with a [`CANCELLED`] error when the call never got that far.
struct PendingCall {
    handler: MethodHandler,
    scope: CallScope,
    record: Option<CallRecord>,
}

impl PendingCall {
    fn new(handler: &MethodHandler, scope: CallScope) -> Self {
        let record = scope.record();
        Self {
            handler: handler.clone(),
            scope,
            record: Some(record),
        }
    }

    fn record(&mut self) -> &mut CallRecord {
        let scope = &self.scope;
        self.record.get_or_insert_with(|| scope.record())
    }

    /// Appends one sent message to a streamed response.
    fn push_response(&mut self, message: Value) {
        push(&mut self.record().response, message);
    }

    fn push_request(&mut self, message: Value) {
        push(&mut self.record().request, message);
    }

    fn fail(&mut self, status: &Status) {
        self.record().error = status.message().to_string();
    }

    fn complete(mut self) {
        if let Some(record) = self.record.take() {
            self.handler.finish(&self.scope, record);
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            if record.error.is_empty() {
                record.error = CANCELLED.to_string();
            }
            self.handler.finish(&self.scope, record);
        }
    }
}

fn push(target: &mut Value, message: Value) {
    match target {
        Value::Array(items) => items.push(message),
        other => *other = Value::Array(vec![message]),
    }
}

/// Shared by the four shape adapters below.
#[derive(Clone)]
pub struct MethodHandler {
    state: Arc<State>,
    method: MethodDescriptor,
}

impl std::fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandler")
            .field("method", &self.method.full_name())
            .finish()
    }
}

impl MethodHandler {
    pub fn new(state: Arc<State>, method: MethodDescriptor) -> Self {
        Self { state, method }
    }

    fn scope(&self, metadata: &MetadataMap) -> CallScope {
        let session = session(metadata);
        if let Some(session) = &session {
            self.state.sessions().touch(session);
        }
        CallScope {
            service: self.method.parent_service().full_name().to_string(),
            method: self.method.name().to_string(),
            session,
            headers: request_headers(metadata),
            request_id: Uuid::new_v4(),
            request_time: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Selects a stub for `query` and renders its output.
    fn resolve(
        &self,
        scope: &CallScope,
        query: &Query,
        request: Map,
        requests: Vec<Value>,
        indexing: StreamIndex,
    ) -> Result<(Arc<Stub>, Rendered), Status> {
        let found = self.state.matcher().find(query).map_err(|err| {
            tracing::debug!(
                service = %scope.service,
                method = %scope.method,
                error = %err,
                "no stub matched"
            );
            Status::not_found(err.to_string())
        })?;

        let data = TemplateData {
            request,
            requests,
            headers: scope.headers.clone(),
            message_index: found.message_index,
            request_time: scope.request_time,
            stub_id: found.stub.id,
            request_id: scope.request_id,
            attempt_number: found.attempt,
            max_attempts: found.stub.options.times,
            ..Default::default()
        };
        let rendered = self
            .state
            .renderer()
            .render(&found.stub.output, scope.call_context(), &data, indexing)
            .map_err(|err| {
                tracing::warn!(stub_id = %found.stub.id, error = %err, "failed to render stub output");
                Status::internal(err.to_string())
            })?;
        Ok((found.stub, rendered))
    }

    fn encode(&self, map: &Map) -> Result<DynamicMessage, Status> {
        map_to_message(&self.method.output(), map).map_err(|err| {
            tracing::warn!(method = %self.method.full_name(), error = %err, "failed to encode reply");
            Status::internal(format!("failed to encode reply: {err}"))
        })
    }

    /// Logs the call, runs `runtime-hook` functions and records it.
    fn finish(&self, scope: &CallScope, record: CallRecord) {
        tracing::debug!(
            service = %scope.service,
            method = %scope.method,
            stub_id = ?record.stub_id,
            elapsed_ms = scope.started.elapsed().as_millis() as u64,
            error = %record.error,
            "served call"
        );

        let hooks = self.state.functions().hooks(RUNTIME_HOOK_GROUP);
        if !hooks.is_empty() {
            let args = [serde_json::to_value(&record).unwrap_or(Value::Null)];
            let ctx = scope.call_context();
            for hook in hooks {
                if let Err(err) = hook(&ctx, &args) {
                    tracing::warn!(error = %err, "runtime hook failed");
                }
            }
        }
        self.state.history().record(record);
    }

    async fn unary(self, request: Request<DynamicMessage>) -> Result<Response<DynamicMessage>, Status> {
        let _guard = self.state.runtime().call_guard();
        let scope = self.scope(request.metadata());
        let message = message_to_map(request.get_ref());
        let query = scope.unary_query(message.clone());
        let requests = vec![Value::Object(message.clone())];

        let resolved = self.resolve(&scope, &query, message.clone(), requests, StreamIndex::Inbound);
        let mut call = PendingCall::new(&self, scope);
        call.record().request = Value::Object(message);
        let result = match resolved {
            Ok((stub, rendered)) => {
                call.record().stub_id = Some(stub.id);
                self.reply_single(rendered).await
            }
            Err(status) => Err(status),
        };
        completed(call.record(), &result);
        call.complete();
        result
    }

    async fn client_stream(
        self,
        request: Request<Streaming<DynamicMessage>>,
    ) -> Result<Response<DynamicMessage>, Status> {
        let _guard = self.state.runtime().call_guard();
        let scope = self.scope(request.metadata());

        let mut inbound = request.into_inner();
        let mut messages = Vec::new();
        while let Some(message) = inbound.message().await? {
            messages.push(message_to_map(&message));
        }

        let query = Query::client_stream(&scope.service, &scope.method, messages.clone())
            .with_session(scope.session.clone())
            .with_headers(scope.headers.clone());
        let requests: Vec<Value> = messages.iter().cloned().map(Value::Object).collect();
        let last = messages.last().cloned().unwrap_or_default();

        let resolved = self.resolve(&scope, &query, last, requests.clone(), StreamIndex::Inbound);
        let mut call = PendingCall::new(&self, scope);
        call.record().request = Value::Array(requests);
        let result = match resolved {
            Ok((stub, rendered)) => {
                call.record().stub_id = Some(stub.id);
                self.reply_single(rendered).await
            }
            Err(status) => Err(status),
        };
        completed(call.record(), &result);
        call.complete();
        result
    }

    /// One reply message, or the configured failure. A stream output answers with its first element.
    async fn reply_single(&self, rendered: Rendered) -> Result<Response<DynamicMessage>, Status> {
        if let Some(delay) = rendered.delay {
            tokio::time::sleep(delay).await;
        }
        let metadata = response_metadata(&rendered.headers);
        let map = match rendered.reply {
            Reply::Failure { code, message } => {
                return Err(Status::with_metadata(code, message, metadata));
            }
            Reply::Message(map) => map,
            Reply::Stream(items) => items.into_iter().next().unwrap_or_default(),
        };
        let mut response = Response::new(self.encode(&map)?);
        *response.metadata_mut() = metadata;
        Ok(response)
    }

    async fn server_stream(
        self,
        request: Request<DynamicMessage>,
    ) -> Result<Response<ResponseStream>, Status> {
        let guard = self.state.runtime().call_guard();
        let scope = self.scope(request.metadata());
        let message = message_to_map(request.get_ref());
        let query = scope.unary_query(message.clone());
        let requests = vec![Value::Object(message.clone())];

        let resolved = self.resolve(&scope, &query, message.clone(), requests, StreamIndex::PerElement);
        let mut call = PendingCall::new(&self, scope);
        call.record().request = Value::Object(message);
        let (stub, rendered) = match resolved {
            Ok(resolved) => resolved,
            Err(status) => {
                call.fail(&status);
                call.complete();
                return Err(status);
            }
        };
        call.record().stub_id = Some(stub.id);

        let metadata = response_metadata(&rendered.headers);
        let delay = rendered.delay;
        let items = match rendered.reply {
            Reply::Failure { code, message } => {
                sleep(delay).await;
                call.record().error = message.clone();
                call.complete();
                return Err(Status::with_metadata(code, message, metadata));
            }
            Reply::Message(map) => vec![map],
            Reply::Stream(items) => items,
        };

        let handler = self.clone();
        call.record().response = Value::Array(Vec::with_capacity(items.len()));
        let output = async_stream::stream! {
            let _guard = guard;
            let mut call = call;
            let mut failure = None;
            for item in items {
                sleep(delay).await;
                match handler.encode(&item) {
                    Ok(message) => {
                        call.push_response(Value::Object(item));
                        yield Ok(message);
                    }
                    Err(status) => {
                        failure = Some(status);
                        break;
                    }
                }
            }
            if let Some(status) = &failure {
                call.fail(status);
            }
            call.complete();
            if let Some(status) = failure {
                yield Err(status);
            }
        };

        let mut response = Response::new(Box::pin(output) as ResponseStream);
        *response.metadata_mut() = metadata;
        Ok(response)
    }

    /// Matches inbound message `index` of a bidirectional call.
    fn bidi_turn(
        &self,
        scope: &CallScope,
        received: &[Map],
        index: usize,
    ) -> Result<(Arc<Stub>, Rendered), Status> {
        let query = Query::bidi(&scope.service, &scope.method, received.to_vec(), index)
            .with_session(scope.session.clone())
            .with_headers(scope.headers.clone());
        let request = received.get(index).cloned().unwrap_or_default();
        let requests = received.iter().cloned().map(Value::Object).collect();
        self.resolve(scope, &query, request, requests, StreamIndex::Inbound)
    }

    async fn bidi(
        self,
        request: Request<Streaming<DynamicMessage>>,
    ) -> Result<Response<ResponseStream>, Status> {
        let guard = self.state.runtime().call_guard();
        let scope = self.scope(request.metadata());
        let mut inbound = request.into_inner();
        let mut call = PendingCall::new(&self, scope.clone());
        call.record().request = Value::Array(Vec::new());
        call.record().response = Value::Array(Vec::new());

        // response headers come from the stub answering the first message
        let mut received = Vec::new();
        let first = match inbound.message().await {
            Ok(Some(message)) => {
                let message = message_to_map(&message);
                call.push_request(Value::Object(message.clone()));
                received.push(message);
                Some(self.bidi_turn(&scope, &received, 0))
            }
            Ok(None) => None,
            Err(status) => {
                call.fail(&status);
                call.complete();
                return Err(status);
            }
        };
        let metadata = match &first {
            Some(Ok((_, rendered))) => response_metadata(&rendered.headers),
            _ => MetadataMap::new(),
        };

        let handler = self.clone();
        let output = async_stream::stream! {
            let _guard = guard;
            let mut call = call;
            let mut failure = None;
            let mut turn = first;

            'turns: loop {
                let current = match turn.take() {
                    Some(current) => current,
                    None => match inbound.message().await {
                        Ok(Some(message)) => {
                            let message = message_to_map(&message);
                            call.push_request(Value::Object(message.clone()));
                            received.push(message);
                            handler.bidi_turn(&scope, &received, received.len() - 1)
                        }
                        Ok(None) => break,
                        Err(status) => {
                            failure = Some(status);
                            break;
                        }
                    },
                };
                let index = received.len().saturating_sub(1);
                let (stub, rendered) = match current {
                    Ok(resolved) => resolved,
                    Err(status) => {
                        failure = Some(status);
                        break;
                    }
                };
                call.record().stub_id = Some(stub.id);

                let delay = rendered.delay;
                let items = match rendered.reply {
                    Reply::Failure { code, message } => {
                        sleep(delay).await;
                        failure = Some(Status::new(code, message));
                        break;
                    }
                    Reply::Message(map) => vec![map],
                    Reply::Stream(items) => bidi_items(&stub, items, index),
                };
                for item in items {
                    sleep(delay).await;
                    match handler.encode(&item) {
                        Ok(message) => {
                            call.push_response(Value::Object(item));
                            yield Ok(message);
                        }
                        Err(status) => {
                            failure = Some(status);
                            break 'turns;
                        }
                    }
                }
            }

            if let Some(status) = &failure {
                call.fail(status);
            }
            call.complete();
            if let Some(status) = failure {
                yield Err(status);
            }
        };

        let mut response = Response::new(Box::pin(output) as ResponseStream);
        *response.metadata_mut() = metadata;
        Ok(response)
    }
}

/// Elements of a stream output sent in answer to inbound message `index`. Stubs keyed by
/// `inputs` answer message `i` with element `i` (a single element answers every message);
/// other stubs send the whole stream.
fn bidi_items(stub: &Stub, items: Vec<Map>, index: usize) -> Vec<Map> {
    if stub.inputs.is_empty() {
        return items;
    }
    if items.len() == 1 {
        return items;
    }
    items.into_iter().nth(index).into_iter().collect()
}

async fn sleep(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

fn completed(record: &mut CallRecord, result: &Result<Response<DynamicMessage>, Status>) {
    match result {
        Ok(response) => record.response = Value::Object(message_to_map(response.get_ref())),
        Err(status) => record.error = status.message().to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Unary(pub MethodHandler);

impl UnaryService<DynamicMessage> for Unary {
    type Response = DynamicMessage;
    type Future = BoxFuture<'static, Result<Response<DynamicMessage>, Status>>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        Box::pin(self.0.clone().unary(request))
    }
}

#[derive(Debug, Clone)]
pub struct ServerStream(pub MethodHandler);

impl ServerStreamingService<DynamicMessage> for ServerStream {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<'static, Result<Response<ResponseStream>, Status>>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        Box::pin(self.0.clone().server_stream(request))
    }
}

#[derive(Debug, Clone)]
pub struct ClientStream(pub MethodHandler);

impl ClientStreamingService<DynamicMessage> for ClientStream {
    type Response = DynamicMessage;
    type Future = BoxFuture<'static, Result<Response<DynamicMessage>, Status>>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        Box::pin(self.0.clone().client_stream(request))
    }
}

#[derive(Debug, Clone)]
pub struct Bidi(pub MethodHandler);

impl StreamingService<DynamicMessage> for Bidi {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<'static, Result<Response<ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        Box::pin(self.0.clone().bidi(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map {
        value.as_object().unwrap().clone()
    }

    fn stub(value: Value) -> Stub {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_bidi_items_follow_inputs() {
        let items = vec![map(json!({"message": "a"})), map(json!({"message": "b"}))];
        let keyed = stub(json!({
            "service": "Greeter", "method": "Chat",
            "inputs": [{"equals": {"name": "x"}}, {"equals": {"name": "y"}}],
            "output": {"stream": [{"message": "a"}, {"message": "b"}]}
        }));
        assert_eq!(bidi_items(&keyed, items.clone(), 1), vec![items[1].clone()]);
        assert!(bidi_items(&keyed, items.clone(), 5).is_empty());
        assert_eq!(bidi_items(&keyed, vec![items[0].clone()], 3), vec![items[0].clone()]);

        let single = stub(json!({
            "service": "Greeter", "method": "Chat",
            "input": {"equals": {}},
            "output": {"stream": [{"message": "a"}, {"message": "b"}]}
        }));
        assert_eq!(bidi_items(&single, items.clone(), 1), items);
    }
}
