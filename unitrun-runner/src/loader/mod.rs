// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating and loading units.
//!
//! The engine never looks inside a unit. It asks a [`Loader`] to turn names into [`Unit`]s and asks
//! each unit to run itself, reporting what happened as an
//! [`ExecutionOutcome`](crate::results::ExecutionOutcome).

pub mod script;

pub use script::*;

use crate::{
    errors::LoadError, host::OutputCapture, results::ExecutionOutcome, test_set::WorkerInfo,
};
use camino::Utf8Path;
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

/// A runnable unit.
pub trait Unit: fmt::Debug + Send + Sync {
    /// The unit's full dotted name.
    fn id(&self) -> &str;

    /// Runs the unit.
    ///
    /// Anything the unit prints should go to `cx.output`.
    fn run(&self, cx: &mut UnitContext<'_>) -> ExecutionOutcome;
}

/// Everything a [`Unit`] has access to while it runs.
#[derive(Debug)]
pub struct UnitContext<'a> {
    /// The worker running the unit.
    pub worker: WorkerInfo,

    /// The worker-local context produced by the setup hook, or the shared run context if there is
    /// no setup hook.
    pub context: &'a Value,

    /// Where output goes.
    pub output: &'a mut OutputCapture,

    /// The maximum time the unit may take.
    pub timeout: Option<Duration>,
}

/// Turns names into runnable units.
///
/// A loader is shared between the orchestrator, which uses it for discovery, and every worker,
/// which uses it to resolve the units it has been asked to run.
pub trait Loader: Send + Sync {
    /// Resolves a dotted name directly.
    ///
    /// Usually yields exactly one unit. Returns an error if nothing with this name exists.
    fn resolve(&self, name: &str) -> Result<Vec<Arc<dyn Unit>>, LoadError>;

    /// Loads the group with the given dotted name and returns its members.
    ///
    /// Returns `Ok(None)` if there is no such group.
    fn load_group(&self, name: &str) -> Result<Option<Vec<Arc<dyn Unit>>>, LoadError>;

    /// Discovers all units under `dir` whose file names match `pattern`, naming them relative to
    /// `top_level_dir`.
    fn discover(
        &self,
        dir: &Utf8Path,
        pattern: &str,
        top_level_dir: &Utf8Path,
    ) -> Result<Vec<Arc<dyn Unit>>, LoadError>;
}

/// Converts a path relative to the top-level directory into a dotted unit name.
///
/// The extension, if any, is dropped.
pub fn path_to_name(relative: &Utf8Path) -> String {
    let without_ext = relative.with_extension("");
    without_ext
        .components()
        .map(|component| component.as_str())
        .filter(|component| *component != ".")
        .collect::<Vec<_>>()
        .join(".")
}
