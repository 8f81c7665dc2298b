// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for unitrun.
//!
//! A run proceeds in a fixed order:
//!
//! 1. **Discovery**: unit names are resolved through a [`Loader`](loader::Loader) and assigned to
//!    the skip, isolated or parallel bucket of a [`TestSet`](test_set::TestSet) by a
//!    [`Classifier`](classifier::Classifier).
//! 2. **Execution**: skipped units produce results immediately, parallel units are dispatched to a
//!    pool of workers, and isolated units are run one at a time.
//! 3. **Retries**: units whose latest result is a failure are run again, serially, up to the
//!    configured retry limit.
//! 4. **Reporting**: a summary is printed, and the full-results and trace documents are written
//!    and optionally uploaded.
//!
//! The [`Orchestrator`](orchestrator::Orchestrator) drives all of the above.

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod fakes;
mod helpers;
pub mod host;
pub mod loader;
pub mod orchestrator;
pub mod reporter;
pub mod results;
mod runner;
pub mod signal;
pub mod stats;
pub mod test_set;
