// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints progress for a run.
//!
//! Progress output is separate from logging: it always goes to standard output through the
//! [`Host`](crate::host::Host).

mod displayer;
mod printer;

pub use displayer::DisplayOptions;
pub(crate) use displayer::Reporter;
