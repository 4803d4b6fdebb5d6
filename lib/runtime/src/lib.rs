// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! GripMock runtime: server configuration, logging and process lifecycle.

pub use anyhow::{
    anyhow as error, bail as raise, Context as ErrorContext, Error, Ok as OK, Result,
};

pub mod config;
pub mod logging;
pub mod runtime;
pub mod utils;

pub use config::ServerConfig;
pub use runtime::Runtime;
pub use tokio_util::sync::CancellationToken;
