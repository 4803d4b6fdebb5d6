// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod graceful_shutdown;

pub use graceful_shutdown::{CallGuard, GracefulShutdownTracker};
