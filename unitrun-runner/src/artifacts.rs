// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Projections of a [`ResultSet`] into the documents written at the end of a run.
//!
//! Nothing here is ever read back by the engine: the full-results document, the trace document
//! and the upload request are all derived once the run has finished.

use crate::{
    errors::{ArtifactKind, WriteArtifactError},
    helpers::{duration_micros, micros_between, seconds_since_epoch},
    host::{FetchRequest, Host},
    results::{ResultSet, ResultType, TestResult},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Serialize;
use std::{collections::BTreeSet, time::SystemTime};
use tracing::debug;
use unitrun_metadata::{
    FullResults, FullResultsStatus, NameConflictError, TestLeaf, TraceDocument, TraceEvent,
    TraceEventArgs, TracePhase,
};

/// The multipart boundary used for upload requests.
pub const UPLOAD_BOUNDARY: &str = "-M-A-G-I-C---B-O-U-N-D-A-R-Y-";

/// Timestamps marking the phases of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPhases {
    /// When the run started. Every trace timestamp is relative to this.
    pub started: SystemTime,

    /// When discovery finished and execution began.
    pub discovered: SystemTime,

    /// When execution (including retries) finished and reporting began.
    pub tested: SystemTime,

    /// When reporting finished.
    pub finished: SystemTime,
}

/// Assembles the full-results document for a run.
///
/// `test_names` is every discovered name, across all buckets. Fails if one name is a prefix of
/// another, since both can't be placed in the `tests` tree.
pub fn make_full_results(
    result_set: &ResultSet,
    test_names: &[String],
    metadata: &IndexMap<String, String>,
    now: SystemTime,
    interrupted: bool,
) -> Result<FullResults, NameConflictError> {
    let mut full_results = FullResults::new(seconds_since_epoch(now), metadata.clone());
    full_results.interrupted = interrupted;

    let failing: BTreeSet<String> = result_set.failed_test_names().into_iter().collect();
    let passing = result_set.passing_test_names();
    let skipped: BTreeSet<&str> = test_names
        .iter()
        .map(String::as_str)
        .filter(|name| !passing.contains(name) && !failing.contains(*name))
        .collect();

    let num_tests = test_names.len();
    let num_failures = failing.len();
    let num_skips = skipped.len();
    full_results
        .num_failures_by_type
        .insert(FullResultsStatus::Fail, num_failures);
    full_results.num_failures_by_type.insert(
        FullResultsStatus::Pass,
        num_tests.saturating_sub(num_failures + num_skips),
    );
    full_results
        .num_failures_by_type
        .insert(FullResultsStatus::Skip, num_skips);

    for name in test_names {
        let leaf = if skipped.contains(name.as_str()) {
            TestLeaf {
                expected: FullResultsStatus::Skip.as_str().to_owned(),
                actual: FullResultsStatus::Skip.as_str().to_owned(),
                is_unexpected: false,
                time: None,
                times: Vec::new(),
            }
        } else {
            leaf_for(result_set.results_for(name))
        };
        full_results.insert_leaf(name, leaf)?;
    }

    Ok(full_results)
}

fn leaf_for<'a>(attempts: impl Iterator<Item = &'a TestResult>) -> TestLeaf {
    let mut actuals = Vec::new();
    let mut times = Vec::new();
    for attempt in attempts {
        let status = match attempt.actual {
            ResultType::Failure => FullResultsStatus::Fail,
            ResultType::Pass => FullResultsStatus::Pass,
            ResultType::Skip => continue,
        };
        actuals.push(status.as_str());
        times.push(attempt.took.as_secs_f64());
    }
    TestLeaf {
        expected: FullResultsStatus::Pass.as_str().to_owned(),
        is_unexpected: actuals.last() == Some(&FullResultsStatus::Fail.as_str()),
        actual: actuals.join(" "),
        time: times.last().copied(),
        times,
    }
}

/// Assembles the trace document for a run: one complete event per result, followed by the
/// `run`, `discovery`, `testing` and `reporting` phase events.
pub fn make_trace(
    result_set: &ResultSet,
    metadata: &IndexMap<String, String>,
    phases: &RunPhases,
    pid: u32,
) -> TraceDocument {
    let mut trace = TraceDocument::new(metadata.clone());
    for result in result_set.results() {
        trace.trace_events.push(TraceEvent {
            name: result.name.clone(),
            ts: micros_between(phases.started, result.started),
            dur: duration_micros(result.took),
            ph: TracePhase::Complete,
            pid: result.pid,
            tid: result.worker,
            args: Some(TraceEventArgs {
                expected: result.expected_names(),
                actual: result.actual.as_str().to_owned(),
                out: result.out.clone(),
                err: result.err.clone(),
                code: result.code,
                unexpected: result.unexpected,
                flaky: result.flaky,
            }),
        });
    }

    let phase_events = [
        ("run", phases.started, phases.finished),
        ("discovery", phases.started, phases.discovered),
        ("testing", phases.discovered, phases.tested),
        ("reporting", phases.tested, phases.finished),
    ];
    for (name, start, end) in phase_events {
        trace.trace_events.push(TraceEvent {
            name: name.to_owned(),
            ts: micros_between(phases.started, start),
            dur: micros_between(start, end),
            ph: TracePhase::Complete,
            pid,
            tid: 0,
            args: None,
        });
    }
    trace
}

/// The identity of a results upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTarget {
    /// The server, as `host[:port]`.
    pub server: String,

    /// The builder that produced the results.
    pub builder: String,

    /// The source (master) the builder belongs to.
    pub source: String,

    /// The kind of run (test type).
    pub kind: String,
}

impl UploadTarget {
    /// Returns the URL results are posted to.
    pub fn url(&self) -> String {
        format!("http://{}/testfile/upload", self.server)
    }
}

/// Builds the `multipart/form-data` POST request that uploads a full-results document.
pub fn make_upload_request(
    target: &UploadTarget,
    full_results: &FullResults,
) -> Result<FetchRequest, serde_json::Error> {
    const CRLF: &str = "\r\n";

    let attrs = [
        ("builder", target.builder.as_str()),
        ("master", target.source.as_str()),
        ("testtype", target.kind.as_str()),
    ];
    let mut lines = Vec::new();
    for (key, value) in attrs {
        lines.push(format!("--{UPLOAD_BOUNDARY}"));
        lines.push(format!("Content-Disposition: form-data; name=\"{key}\""));
        lines.push(String::new());
        lines.push(value.to_owned());
    }
    lines.push(format!("--{UPLOAD_BOUNDARY}"));
    lines.push(
        "Content-Disposition: form-data; name=\"file\"; filename=\"full_results.json\"".to_owned(),
    );
    lines.push("Content-Type: application/json".to_owned());
    lines.push(String::new());
    lines.push(serde_json::to_string(full_results)?);
    lines.push(format!("--{UPLOAD_BOUNDARY}--"));
    lines.push(String::new());

    Ok(FetchRequest {
        url: target.url(),
        headers: vec![(
            "Content-Type".to_owned(),
            format!("multipart/form-data; boundary={UPLOAD_BOUNDARY}"),
        )],
        body: lines.join(CRLF).into_bytes(),
    })
}

/// Writes an artifact as pretty-printed JSON followed by a newline.
pub fn write_json<T: Serialize>(
    host: &dyn Host,
    kind: ArtifactKind,
    path: &Utf8Path,
    value: &T,
) -> Result<(), WriteArtifactError> {
    let mut contents = serde_json::to_string_pretty(value)
        .map_err(|err| WriteArtifactError::Serialize { kind, err })?;
    contents.push('\n');
    host.write_text_file(path, &contents)
        .map_err(|err| WriteArtifactError::Write {
            kind,
            path: path.to_owned(),
            err,
        })?;
    debug!(%path, %kind, "wrote artifact");
    Ok(())
}
