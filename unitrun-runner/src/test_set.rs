// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The partitioned set of units for one pass of a run.

use crate::{errors::HookError, results::ResultType};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};

/// A single unit of work, as it is handed to a worker.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestInput {
    /// The unique, dotted name of the unit.
    pub name: String,

    /// Why the unit is being skipped, for units in the skip bucket.
    pub message: Option<String>,

    /// The maximum time the unit may run for.
    pub timeout: Option<Duration>,

    /// The outcomes the unit is declared to have. When non-empty, these replace the expected
    /// outcomes derived from the unit's execution.
    pub expected: Vec<ResultType>,
}

impl TestInput {
    /// Creates a new input with the given name and no other information.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
            timeout: None,
            expected: Vec::new(),
        }
    }

    /// Sets the skip message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Declares the outcomes the unit is expected to have.
    pub fn with_expected(mut self, expected: impl IntoIterator<Item = ResultType>) -> Self {
        self.expected = expected.into_iter().collect();
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Identifies a worker to its hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerInfo {
    /// The worker's ordinal, starting at 1.
    pub worker_id: usize,

    /// The ID of the process the worker runs in.
    pub pid: u32,
}

/// A pair of hooks run once per worker: `setup` when the worker starts and `teardown` when it
/// shuts down.
pub trait WorkerHooks: Send + Sync {
    /// Derives the worker-local context from the shared run context.
    fn setup(&self, worker: &WorkerInfo, context: &Value) -> Result<Value, HookError>;

    /// Releases whatever `setup` acquired.
    fn teardown(&self, worker: &WorkerInfo, context_after_setup: &Value) -> Result<(), HookError>;
}

/// Per-worker instrumentation such as code coverage.
///
/// `start` is called when a worker becomes ready and `stop` when it drains. The orchestrator
/// calls `report` once the run is complete.
pub trait Instrumentation: Send + Sync {
    /// Starts collecting for a worker.
    fn start(&self, worker: &WorkerInfo);

    /// Stops collecting for a worker and flushes what was collected.
    fn stop(&self, worker: &WorkerInfo);

    /// Produces a human-readable report, if there is anything to report.
    fn report(&self) -> Option<String>;
}

/// The units of one pass, partitioned into buckets.
///
/// Each bucket is sorted by name before it is executed.
#[derive(Clone, Default)]
pub struct TestSet {
    /// Units that may run concurrently with each other.
    pub parallel: Vec<TestInput>,

    /// Units that must run one at a time.
    pub isolated: Vec<TestInput>,

    /// Units that are not run at all.
    pub skip: Vec<TestInput>,

    /// The opaque run context, shared read-only by every worker.
    pub context: Arc<Value>,

    /// Hooks run once per worker.
    pub hooks: Option<Arc<dyn WorkerHooks>>,
}

impl fmt::Debug for TestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSet")
            .field("parallel", &self.parallel)
            .field("isolated", &self.isolated)
            .field("skip", &self.skip)
            .field("context", &self.context)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl TestSet {
    /// Creates an empty set sharing the given context and hooks.
    pub fn new(context: Arc<Value>, hooks: Option<Arc<dyn WorkerHooks>>) -> Self {
        Self {
            parallel: Vec::new(),
            isolated: Vec::new(),
            skip: Vec::new(),
            context,
            hooks,
        }
    }

    /// Adds a unit to the parallel bucket.
    pub fn add_parallel(&mut self, input: TestInput) {
        self.parallel.push(input);
    }

    /// Adds a unit to the isolated bucket.
    pub fn add_isolated(&mut self, input: TestInput) {
        self.isolated.push(input);
    }

    /// Adds a unit to the skip bucket with the given message.
    pub fn add_skip(&mut self, input: TestInput, message: impl Into<String>) {
        self.skip.push(input.with_message(message));
    }

    /// Returns true if the set contains this name in any bucket.
    pub fn contains(&self, name: &str) -> bool {
        self.iter_all().any(|input| input.name == name)
    }

    /// Returns the number of units in all buckets.
    pub fn len(&self) -> usize {
        self.parallel.len() + self.isolated.len() + self.skip.len()
    }

    /// Returns true if there are no units in any bucket.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of units that will actually execute.
    pub fn runnable_count(&self) -> usize {
        self.parallel.len() + self.isolated.len()
    }

    /// Iterates over the skip, parallel and isolated buckets, in that order.
    pub fn iter_all(&self) -> impl Iterator<Item = &TestInput> + '_ {
        self.skip
            .iter()
            .chain(self.parallel.iter())
            .chain(self.isolated.iter())
    }

    /// Sorts every bucket by name.
    pub fn sort(&mut self) {
        self.parallel.sort_by(|a, b| a.name.cmp(&b.name));
        self.isolated.sort_by(|a, b| a.name.cmp(&b.name));
        self.skip.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Creates the set for a retry pass: the given names, isolated, with the same context and
    /// hooks. Declared expectations carry over from this set.
    pub(crate) fn for_retry(&self, names: &[String], timeout: Option<Duration>) -> Self {
        let mut retry = Self::new(self.context.clone(), self.hooks.clone());
        retry.isolated = names
            .iter()
            .map(|name| {
                let expected = self
                    .iter_all()
                    .find(|input| input.name == *name)
                    .map(|input| input.expected.clone())
                    .unwrap_or_default();
                TestInput::new(name.clone())
                    .with_expected(expected)
                    .with_timeout(timeout)
            })
            .collect();
        retry
    }
}
