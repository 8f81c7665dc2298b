// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result model: one immutable record per executed unit, and the append-only collection of
//! those records for a run.

use indexmap::{IndexMap, IndexSet};
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// The outcome of executing a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum ResultType {
    /// The unit failed.
    Failure,

    /// The unit passed.
    Pass,

    /// The unit was skipped.
    Skip,
}

impl ResultType {
    /// Returns the string form of this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failure => "Failure",
            Self::Pass => "Pass",
            Self::Skip => "Skip",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The neutral record of what happened while a unit ran.
///
/// Loaders fill this in; [`ExecutionOutcome::classify`] turns it into an outcome using a fixed
/// precedence order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Recorded assertion failures, with their details.
    pub failures: Vec<String>,

    /// Recorded errors, with their details.
    pub errors: Vec<String>,

    /// The reason the unit skipped itself, if it did.
    pub skipped: Option<String>,

    /// The details of an expected failure, if one occurred.
    pub expected_failure: Option<String>,

    /// True if a unit that was expected to fail passed.
    pub unexpected_success: bool,
}

impl ExecutionOutcome {
    /// An outcome with nothing recorded: a plain pass.
    pub fn pass() -> Self {
        Self::default()
    }

    /// An outcome with a single recorded failure.
    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            failures: vec![details.into()],
            ..Self::default()
        }
    }

    /// An outcome with a single recorded error.
    pub fn error(details: impl Into<String>) -> Self {
        Self {
            errors: vec![details.into()],
            ..Self::default()
        }
    }

    /// An outcome where the unit skipped itself.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Classifies this outcome. The first rule in [`OUTCOME_RULES`] that matches wins.
    pub fn classify(&self) -> Classification<'_> {
        for rule in OUTCOME_RULES {
            if let Some(details) = (rule.matches)(self) {
                return Classification { rule, details };
            }
        }
        unreachable!("the last outcome rule matches everything")
    }
}

/// One row of the outcome precedence table.
#[derive(Debug)]
pub struct OutcomeRule {
    /// Returns the details to append to the error text if this rule applies.
    pub matches: fn(&ExecutionOutcome) -> Option<&str>,

    /// The actual outcome.
    pub actual: ResultType,

    /// The expected outcome.
    pub expected: ResultType,

    /// Whether `actual` was unexpected.
    pub unexpected: bool,

    /// 0 for success, 1 for failure.
    pub code: i32,
}

/// The outcome precedence table, in order.
pub static OUTCOME_RULES: &[OutcomeRule] = &[
    OutcomeRule {
        matches: first_failure,
        actual: ResultType::Failure,
        expected: ResultType::Pass,
        unexpected: true,
        code: 1,
    },
    OutcomeRule {
        matches: first_error,
        actual: ResultType::Failure,
        expected: ResultType::Pass,
        unexpected: true,
        code: 1,
    },
    OutcomeRule {
        matches: skip_reason,
        actual: ResultType::Skip,
        expected: ResultType::Skip,
        unexpected: false,
        code: 0,
    },
    OutcomeRule {
        matches: expected_failure,
        actual: ResultType::Failure,
        expected: ResultType::Failure,
        unexpected: false,
        code: 1,
    },
    OutcomeRule {
        matches: unexpected_success,
        actual: ResultType::Pass,
        expected: ResultType::Failure,
        unexpected: true,
        code: 0,
    },
    OutcomeRule {
        matches: always,
        actual: ResultType::Pass,
        expected: ResultType::Pass,
        unexpected: false,
        code: 0,
    },
];

fn first_failure(outcome: &ExecutionOutcome) -> Option<&str> {
    outcome.failures.first().map(String::as_str)
}

fn first_error(outcome: &ExecutionOutcome) -> Option<&str> {
    outcome.errors.first().map(String::as_str)
}

fn skip_reason(outcome: &ExecutionOutcome) -> Option<&str> {
    outcome.skipped.as_deref()
}

fn expected_failure(outcome: &ExecutionOutcome) -> Option<&str> {
    outcome.expected_failure.as_deref()
}

fn unexpected_success(outcome: &ExecutionOutcome) -> Option<&str> {
    outcome.unexpected_success.then_some("")
}

fn always(_: &ExecutionOutcome) -> Option<&str> {
    Some("")
}

/// The result of [`ExecutionOutcome::classify`].
#[derive(Debug)]
pub struct Classification<'a> {
    /// The rule that matched.
    pub rule: &'static OutcomeRule,

    /// Details to append to the unit's error text.
    pub details: &'a str,
}

/// The immutable record of one executed unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    /// The unit name.
    pub name: String,

    /// The actual outcome.
    pub actual: ResultType,

    /// The expected outcomes.
    pub expected: Vec<ResultType>,

    /// True if `actual` is not in `expected`.
    pub unexpected: bool,

    /// True if the unit is known to be flaky.
    pub flaky: bool,

    /// When the unit started.
    pub started: SystemTime,

    /// How long the unit took.
    pub took: Duration,

    /// The ordinal of the worker that ran the unit. Skipped units report worker 0.
    pub worker: usize,

    /// The ID of the process that ran the unit.
    pub pid: u32,

    /// 0 for success, nonzero for failure.
    pub code: i32,

    /// Captured standard output.
    pub out: String,

    /// Captured standard error.
    pub err: String,
}

impl TestResult {
    /// Builds a result from a classified execution outcome.
    pub(crate) fn from_outcome(
        name: String,
        outcome: &ExecutionOutcome,
        timing: ResultTiming,
        out: String,
        mut err: String,
    ) -> Self {
        let Classification { rule, details } = outcome.classify();
        err.push_str(details);
        Self {
            name,
            actual: rule.actual,
            expected: vec![rule.expected],
            unexpected: rule.unexpected,
            flaky: false,
            started: timing.started,
            took: timing.took,
            worker: timing.worker,
            pid: timing.pid,
            code: rule.code,
            out,
            err,
        }
    }

    /// Replaces the expected outcomes with ones declared on the unit's input, if there are any,
    /// and recomputes `unexpected` against them.
    pub(crate) fn with_declared_expectations(mut self, expected: &[ResultType]) -> Self {
        if !expected.is_empty() {
            self.expected = expected.to_vec();
            self.unexpected = !expected.contains(&self.actual);
        }
        self
    }

    /// Builds a failure result for a unit that could not be resolved or run.
    pub(crate) fn infrastructure_failure(
        name: String,
        timing: ResultTiming,
        out: String,
        err: String,
    ) -> Self {
        Self {
            name,
            actual: ResultType::Failure,
            expected: vec![ResultType::Pass],
            unexpected: true,
            flaky: false,
            started: timing.started,
            took: timing.took,
            worker: timing.worker,
            pid: timing.pid,
            code: 1,
            out,
            err,
        }
    }

    /// Builds the result for a unit in the skip bucket.
    pub(crate) fn skipped(name: String, timing: ResultTiming, message: String) -> Self {
        Self {
            name,
            actual: ResultType::Skip,
            expected: vec![ResultType::Skip],
            unexpected: false,
            flaky: false,
            started: timing.started,
            took: timing.took,
            worker: timing.worker,
            pid: timing.pid,
            code: 0,
            out: message,
            err: String::new(),
        }
    }

    /// Returns the expected outcomes as sorted strings.
    pub fn expected_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .expected
            .iter()
            .map(|expected| expected.as_str().to_owned())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Timing and provenance shared by all result constructors.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResultTiming {
    pub(crate) started: SystemTime,
    pub(crate) took: Duration,
    pub(crate) worker: usize,
    pub(crate) pid: u32,
}

/// The append-only, ordered collection of every result produced during a run.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    results: Vec<TestResult>,
}

impl ResultSet {
    /// Creates an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result.
    pub fn add(&mut self, result: TestResult) {
        self.results.push(result);
    }

    /// Appends every result from another set, in order.
    pub fn extend(&mut self, other: ResultSet) {
        self.results.extend(other.results);
    }

    /// Returns all results in the order they were added.
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns every result for the given name, oldest first.
    pub fn results_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TestResult> + 'a {
        self.results.iter().filter(move |result| result.name == name)
    }

    /// Returns the most recent result for each name, in first-seen order.
    pub fn latest(&self) -> IndexMap<&str, &TestResult> {
        let mut latest = IndexMap::new();
        for result in &self.results {
            latest.insert(result.name.as_str(), result);
        }
        latest
    }

    /// Returns the names whose most recent result is a failure, sorted.
    pub fn failed_test_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .latest()
            .into_iter()
            .filter(|(_, result)| result.actual == ResultType::Failure)
            .map(|(name, _)| name.to_owned())
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns the names with at least one passing result whose most recent result is not a
    /// failure.
    pub fn passing_test_names(&self) -> IndexSet<&str> {
        let latest = self.latest();
        self.results
            .iter()
            .filter(|result| result.actual == ResultType::Pass)
            .map(|result| result.name.as_str())
            .filter(|name| {
                latest
                    .get(name)
                    .is_some_and(|latest| latest.actual != ResultType::Failure)
            })
            .collect()
    }

    /// Returns the number of names whose most recent result is a failure.
    pub fn num_failures(&self) -> usize {
        self.latest()
            .values()
            .filter(|result| result.actual == ResultType::Failure)
            .count()
    }
}
