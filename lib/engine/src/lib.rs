// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor-driven gRPC mock engine.
//!
//! Services are known only through their descriptors. Each call is decoded dynamically,
//! matched against the stub store, rendered through the template engine and answered in the
//! shape its method declares. The admin REST surface manages stubs and inspects call history.

pub mod admin;
pub mod convert;
pub mod descriptors;
pub mod grpc;
pub mod history;
pub mod plugins;
pub mod render;
pub mod session;
pub mod state;
pub mod stubs;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use descriptors::DescriptorRegistry;
pub use grpc::GrpcService;
pub use history::{CallRecord, HistoryRecorder};
pub use plugins::FunctionRegistry;
pub use state::State;
pub use stubs::{Matcher, StubStore};
