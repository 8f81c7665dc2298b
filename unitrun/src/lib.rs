// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A parallel test harness.
//!
//! unitrun discovers executable test units below a project directory, runs them across a pool
//! of workers, retries failures, and writes machine-readable results and a timing trace.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext};
