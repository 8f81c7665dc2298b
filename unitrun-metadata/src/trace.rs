// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A Chrome-trace-compatible timing document.
///
/// The document can be loaded into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    /// The list of events.
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,

    /// User-supplied `key=value` metadata.
    #[serde(rename = "otherData")]
    pub other_data: IndexMap<String, String>,
}

impl TraceDocument {
    /// Creates an empty trace with the given metadata.
    pub fn new(other_data: IndexMap<String, String>) -> Self {
        Self {
            trace_events: Vec::new(),
            other_data,
        }
    }

    /// Returns the event with the given name, if any.
    pub fn event(&self, name: &str) -> Option<&TraceEvent> {
        self.trace_events.iter().find(|event| event.name == name)
    }
}

/// A single event in a [`TraceDocument`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// The name of the unit or phase.
    pub name: String,

    /// Start time in microseconds, relative to the start of the run.
    pub ts: i64,

    /// Duration in microseconds.
    pub dur: i64,

    /// The event phase.
    pub ph: TracePhase,

    /// The process that produced the event.
    pub pid: u32,

    /// The worker ordinal that produced the event.
    pub tid: usize,

    /// Per-unit details. Absent for synthetic phase events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<TraceEventArgs>,
}

/// The phase of a [`TraceEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TracePhase {
    /// A complete event with both a start time and a duration.
    #[serde(rename = "X")]
    Complete,
}

/// Details about a unit execution attached to a [`TraceEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEventArgs {
    /// The expected outcomes, sorted by name.
    pub expected: Vec<String>,

    /// The actual outcome.
    pub actual: String,

    /// Captured standard output.
    pub out: String,

    /// Captured standard error.
    pub err: String,

    /// 0 for success, nonzero for failure.
    pub code: i32,

    /// Whether the actual outcome was not among the expected outcomes.
    pub unexpected: bool,

    /// Whether the unit was considered flaky.
    pub flaky: bool,
}
