// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output formats produced by unitrun.
//!
//! unitrun writes two JSON documents at the end of a run:
//!
//! * the [full-results document](FullResults), a summary of every unit that was discovered, keyed
//!   by the path-delimited segments of the unit name;
//! * the [trace document](TraceDocument), a Chrome-trace-compatible list of timing events, one per
//!   executed unit plus synthetic events for the phases of the run.
//!
//! The exit codes used by the `unitrun` binary are documented in [`UnitrunExitCode`].

mod errors;
mod exit_codes;
mod full_results;
mod trace;

pub use errors::*;
pub use exit_codes::*;
pub use full_results::*;
pub use trace::*;
