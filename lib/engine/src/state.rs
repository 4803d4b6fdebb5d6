// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared engine state handed to the gRPC dispatcher and the admin surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gripmock_runtime::{Runtime, ServerConfig};

use crate::descriptors::DescriptorRegistry;
use crate::history::{HistoryOptions, HistoryRecorder};
use crate::plugins::FunctionRegistry;
use crate::render::OutputRenderer;
use crate::session::SessionTracker;
use crate::stubs::loader::StubLoader;
use crate::stubs::{Matcher, StubStore};
use crate::template::TemplateEngine;

/// Every registry the engine reads and writes, constructed once at start-up.
pub struct State {
    runtime: Runtime,
    descriptors: Arc<DescriptorRegistry>,
    functions: Arc<FunctionRegistry>,
    store: Arc<StubStore>,
    matcher: Matcher,
    renderer: OutputRenderer,
    history: Arc<HistoryRecorder>,
    sessions: Arc<SessionTracker>,
    loader: Arc<StubLoader>,
    ready: AtomicBool,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("runtime", &self.runtime.id())
            .field("descriptors", &self.descriptors)
            .field("stubs", &self.store.len())
            .field("calls", &self.history.count())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl State {
    pub fn new(
        runtime: Runtime,
        descriptors: Arc<DescriptorRegistry>,
        functions: Arc<FunctionRegistry>,
        history: HistoryOptions,
    ) -> Self {
        let store = Arc::new(StubStore::new());
        let matcher = Matcher::new(store.clone()).with_functions(functions.clone());
        let renderer = OutputRenderer::new(TemplateEngine::new(functions.clone()));
        let loader = Arc::new(StubLoader::new(store.clone()));

        Self {
            runtime,
            descriptors,
            functions,
            store,
            matcher,
            renderer,
            history: Arc::new(HistoryRecorder::new(history)),
            sessions: Arc::new(SessionTracker::new()),
            loader,
            ready: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        runtime: Runtime,
        descriptors: Arc<DescriptorRegistry>,
        functions: Arc<FunctionRegistry>,
        config: &ServerConfig,
    ) -> Self {
        let history = HistoryOptions {
            enabled: config.history_enabled,
            redact_keys: config.history_redact_keys.clone(),
            limit_bytes: config.history_limit_bytes,
            message_max_bytes: config.history_message_max_bytes,
        };
        Self::new(runtime, descriptors, functions, history)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn descriptors(&self) -> &Arc<DescriptorRegistry> {
        &self.descriptors
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn store(&self) -> &Arc<StubStore> {
        &self.store
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn renderer(&self) -> &OutputRenderer {
        &self.renderer
    }

    pub fn history(&self) -> &Arc<HistoryRecorder> {
        &self.history
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn loader(&self) -> &Arc<StubLoader> {
        &self.loader
    }

    /// Set once the gRPC listener is accepting calls.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}
