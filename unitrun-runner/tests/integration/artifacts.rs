// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, eyre};
use pretty_assertions::assert_eq;
use unitrun_metadata::{FullResults, FullResultsStatus, TraceDocument};
use unitrun_runner::{config::RunOptions, results::ExecutionOutcome};

#[test]
fn full_results_and_trace_are_written() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_pass");
    project.loader.add_failing("pkg.a_test.test_fail", "boom\n");
    project
        .loader
        .add_unit("pkg.a_test.test_self_skip", |_| ExecutionOutcome::skip("no network"));
    project.loader.add_passing("pkg.b_test.test_skipped");

    let output = project.run(RunOptions {
        skip: vec!["pkg.b_test.*".to_owned()],
        metadata: vec!["bot=linux".to_owned(), "url=http://x/?a=b".to_owned()],
        write_full_results_to: Some("out/full_results.json".into()),
        write_trace_to: Some("out/trace.json".into()),
        ..Default::default()
    })??;
    assert_eq!(output.exit_code, 1);

    let written = project
        .host
        .file("out/full_results.json")
        .ok_or_else(|| eyre!("full results not written"))?;
    assert!(written.ends_with("}\n"));
    let full: FullResults = serde_json::from_str(&written)?;
    assert_eq!(Some(&full), output.full_results.as_ref());

    assert_eq!(full.version, 3);
    assert!(!full.interrupted);
    assert_eq!(full.path_delimiter, ".");
    assert_eq!(full.metadata["bot"], "linux");
    assert_eq!(full.metadata["url"], "http://x/?a=b");
    assert_eq!(full.count(FullResultsStatus::Fail), 1);
    assert_eq!(full.count(FullResultsStatus::Pass), 1);
    assert_eq!(full.count(FullResultsStatus::Skip), 2);

    let value: serde_json::Value = serde_json::from_str(&written)?;
    let tests = &value["tests"]["pkg"];
    let fail = &tests["a_test"]["test_fail"];
    assert_eq!(fail["expected"], "PASS");
    assert_eq!(fail["actual"], "FAIL");
    assert_eq!(fail["is_unexpected"], true);
    assert_eq!(fail["times"].as_array().map(Vec::len), Some(1));
    assert_eq!(fail["time"], fail["times"][0]);
    assert_eq!(
        tests["b_test"]["test_skipped"],
        serde_json::json!({ "expected": "SKIP", "actual": "SKIP" })
    );
    assert_eq!(tests["a_test"]["test_self_skip"]["actual"], "SKIP");
    assert!(tests["a_test"]["test_pass"].get("is_unexpected").is_none());

    let trace: TraceDocument = serde_json::from_str(
        &project
            .host
            .file("out/trace.json")
            .ok_or_else(|| eyre!("trace not written"))?,
    )?;
    assert_eq!(Some(&trace), output.trace.as_ref());
    assert_eq!(trace.other_data, full.metadata);
    assert_eq!(trace.trace_events.len(), output.result_set.len() + 4);

    let fail = trace.event("pkg.a_test.test_fail").expect("event for failing unit");
    let args = fail.args.as_ref().expect("unit events have args");
    assert_eq!(args.actual, "Failure");
    assert_eq!(args.expected, vec!["Pass".to_owned()]);
    assert_eq!(args.err, "boom\n");
    assert_eq!(args.code, 1);
    assert!(args.unexpected);

    let run = trace.event("run").expect("run phase");
    let discovery = trace.event("discovery").expect("discovery phase");
    let testing = trace.event("testing").expect("testing phase");
    let reporting = trace.event("reporting").expect("reporting phase");
    assert_eq!(run.ts, 0);
    assert_eq!(discovery.ts, 0);
    assert_eq!(testing.ts, discovery.dur);
    assert_eq!(reporting.ts, testing.ts + testing.dur);
    assert_eq!(run.dur, reporting.ts + reporting.dur);
    assert!(run.args.is_none());

    // Every unit ran inside the testing phase.
    for event in &trace.trace_events {
        if event.args.is_some() {
            assert!(event.ts >= testing.ts, "{} started before testing", event.name);
            assert!(event.ts + event.dur <= testing.ts + testing.dur);
        }
    }
    Ok(())
}

#[test]
fn nothing_is_written_unless_asked() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_pass");

    let output = project.run(RunOptions::default())??;
    assert!(output.full_results.is_some());
    assert!(output.trace.is_some());
    assert!(project.host.requests().is_empty());
    assert_eq!(project.host.file("full_results.json"), None);
    Ok(())
}
