// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution engine: the worker pool, the scheduler that feeds it, and retries.

mod imp;
mod pool;
mod retry;
mod worker;

pub(crate) use imp::Scheduler;
pub(crate) use retry::RetryController;
