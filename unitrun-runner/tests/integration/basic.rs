// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use test_case::test_case;
use test_strategy::proptest;
use unitrun_metadata::{FullResultsStatus, UnitrunExitCode};
use unitrun_runner::{
    config::{RunConfig, RunOptions},
    errors::{ConfigurationError, RunError},
    results::{ExecutionOutcome, ResultType},
};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

#[test]
fn all_units_pass() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");
    project.loader.add_passing("pkg.a_test.test_two");
    project.loader.add_passing("pkg.b_test.test_three");

    let output = project.run(RunOptions {
        jobs: Some(2),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    let full_results = output.full_results.expect("units ran");
    assert_eq!(full_results.count(FullResultsStatus::Pass), 3);
    assert_eq!(full_results.count(FullResultsStatus::Fail), 0);
    assert_eq!(output.result_set.len(), 3);
    assert!(
        output
            .result_set
            .results()
            .iter()
            .all(|result| (1..=2).contains(&result.worker))
    );
    assert!(
        project.host.stdout().ends_with("3 tests run, 0 failures.\n"),
        "stdout: {}",
        project.host.stdout()
    );
    Ok(())
}

#[test]
fn skip_glob_never_dispatches() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.mod.test_skipped");
    project.loader.add_passing("pkg.other.test_run");

    let output = project.run(RunOptions {
        tests: strings(&["pkg"]),
        skip: strings(&["pkg.mod.*"]),
        ..Default::default()
    })??;

    assert_eq!(outcomes(&output.result_set), vec![
        ("pkg.mod.test_skipped", ResultType::Skip),
        ("pkg.other.test_run", ResultType::Pass),
    ]);
    let skipped = &output.result_set.results()[0];
    assert_eq!(skipped.out, "skipped by request");
    assert_eq!(skipped.worker, 0);
    assert_eq!(project.loader.runs("pkg.mod.test_skipped"), 0);
    assert_eq!(output.exit_code, UnitrunExitCode::OK);

    let full_results = output.full_results.expect("units ran");
    assert_eq!(full_results.count(FullResultsStatus::Skip), 1);
    Ok(())
}

#[test]
fn flaky_unit_passes_on_second_retry() -> Result<()> {
    let project = Project::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    project.loader.add_unit("pkg.flaky_test.test_sometimes", move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            ExecutionOutcome::failure("not this time")
        } else {
            ExecutionOutcome::pass()
        }
    });
    project.loader.add_passing("pkg.flaky_test.test_always");

    let output = project.run(RunOptions {
        retry_limit: Some(2),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    let history: Vec<_> = output
        .result_set
        .results_for("pkg.flaky_test.test_sometimes")
        .map(|result| result.actual)
        .collect();
    assert_eq!(history, vec![
        ResultType::Failure,
        ResultType::Failure,
        ResultType::Pass
    ]);
    assert_eq!(project.loader.runs("pkg.flaky_test.test_always"), 1);

    let leaf = output
        .full_results
        .as_ref()
        .and_then(|full| full.leaf("pkg.flaky_test.test_sometimes"))
        .expect("leaf exists");
    assert_eq!(leaf.actual, "FAIL FAIL PASS");
    assert!(!leaf.is_unexpected);

    let stdout = project.host.stdout();
    assert!(stdout.contains("\nRetrying failed tests (attempt #1 of 2)...\n\n"));
    assert!(stdout.contains("\nRetrying failed tests (attempt #2 of 2)...\n\n"));
    Ok(())
}

#[test]
fn retries_accumulate_until_limit() -> Result<()> {
    let project = Project::new();
    project.loader.add_failing("pkg.bad_test.test_broken", "assertion failed");
    project.loader.add_passing("pkg.bad_test.test_fine");

    let output = project.run(RunOptions {
        retry_limit: Some(3),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::FAILURE);
    assert_eq!(project.loader.runs("pkg.bad_test.test_broken"), 4);
    assert_eq!(project.loader.runs("pkg.bad_test.test_fine"), 1);

    let retries: Vec<_> = output
        .result_set
        .results_for("pkg.bad_test.test_broken")
        .collect();
    assert_eq!(retries.len(), 4);
    // Retry passes run on a single, fresh worker.
    assert!(retries[1..].iter().all(|result| result.worker == 1));
    assert!(retries.iter().all(|result| result.err == "assertion failed"));

    let full_results = output.full_results.expect("units ran");
    assert_eq!(full_results.count(FullResultsStatus::Fail), 1);
    let leaf = full_results.leaf("pkg.bad_test.test_broken").expect("leaf");
    assert_eq!(leaf.actual, "FAIL FAIL FAIL FAIL");
    assert!(leaf.is_unexpected);
    assert!(
        project
            .host
            .stdout()
            .ends_with("2 tests run, 1 failure.\n")
    );
    Ok(())
}

#[test]
fn no_units_to_run() -> Result<()> {
    let project = Project::new();
    let result = project.run(RunOptions {
        write_full_results_to: Some("full.json".into()),
        write_trace_to: Some("trace.json".into()),
        ..Default::default()
    })?;

    let err = result.expect_err("nothing was discovered");
    assert!(matches!(err, RunError::NoTestsToRun));
    assert_eq!(err.to_string(), "No tests to run.");
    assert_eq!(err.process_exit_code(), UnitrunExitCode::FAILURE);
    assert_eq!(project.host.file("full.json"), None);
    assert_eq!(project.host.file("trace.json"), None);
    Ok(())
}

#[test]
fn only_skipped_units_is_no_units_to_run() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");

    let result = project.run(RunOptions {
        skip: strings(&["*"]),
        ..Default::default()
    })?;
    assert!(matches!(result, Err(RunError::NoTestsToRun)));
    Ok(())
}

#[test]
fn malformed_metadata_never_runs() {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");

    let err = RunConfig::resolve(
        RunOptions {
            metadata: strings(&["nokey"]),
            ..Default::default()
        },
        &*project.host,
    )
    .expect_err("metadata without = is rejected");
    assert!(matches!(err, ConfigurationError::MalformedMetadata { .. }));
    assert_eq!(project.loader.runs("pkg.a_test.test_one"), 0);
}

#[test]
fn discovery_failure_aborts_the_run() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");

    let result = project.run(RunOptions {
        tests: strings(&["pkg.a_test.test_one", "pkg.missing"]),
        ..Default::default()
    })?;

    let err = result.expect_err("pkg.missing can't be loaded");
    assert_eq!(
        err.to_string(),
        "Failed to load \"pkg.missing\": no unit or group named `pkg.missing`"
    );
    assert_eq!(err.process_exit_code(), UnitrunExitCode::FAILURE);
    assert_eq!(project.loader.runs("pkg.a_test.test_one"), 0);
    Ok(())
}

#[test]
fn prefix_unit_names_are_rejected() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test");
    project.loader.add_failing("pkg.a_test.b_test", "broken");

    let err = project
        .run(RunOptions::default())?
        .expect_err("pkg.a_test is a prefix of pkg.a_test.b_test");
    assert!(matches!(err, RunError::NameConflict(_)), "unexpected error: {err}");
    assert_eq!(
        err.to_string(),
        "unit names `pkg.a_test.b_test` and `pkg.a_test` conflict: one is a prefix of the other"
    );
    assert_eq!(err.process_exit_code(), UnitrunExitCode::FAILURE);
    assert_eq!(project.loader.runs("pkg.a_test"), 0);
    assert_eq!(project.loader.runs("pkg.a_test.b_test"), 0);
    Ok(())
}

#[test]
fn isolated_units_run_serially() -> Result<()> {
    let project = Project::new();
    for name in ["pkg.db_test.test_a", "pkg.db_test.test_b", "pkg.db_test.test_c"] {
        project.loader.add_unit(name, |_| {
            std::thread::sleep(Duration::from_millis(10));
            ExecutionOutcome::pass()
        });
    }
    for name in ["pkg.fast_test.test_x", "pkg.fast_test.test_y"] {
        project.loader.add_passing(name);
    }

    let output = project.run(RunOptions {
        jobs: Some(4),
        isolate: strings(&["pkg.db_test.*"]),
        ..Default::default()
    })??;

    // Isolated units run after every parallel unit, in name order, one at a time.
    let order: Vec<_> = output
        .result_set
        .results()
        .iter()
        .map(|result| result.name.as_str())
        .skip(2)
        .collect();
    assert_eq!(order, vec![
        "pkg.db_test.test_a",
        "pkg.db_test.test_b",
        "pkg.db_test.test_c"
    ]);

    let intervals: Vec<_> = order
        .iter()
        .map(|name| interval(&output.result_set, name))
        .collect();
    for pair in intervals.windows(2) {
        assert!(pair[0].1 < pair[1].0, "isolated intervals overlap: {pair:?}");
    }
    Ok(())
}

#[test]
fn parallel_units_in_flight_are_bounded() -> Result<()> {
    check_peak_in_flight(8, 3, 3)
}

#[test]
fn parallel_units_in_flight_are_bounded_by_unit_count() -> Result<()> {
    check_peak_in_flight(2, 8, 2)
}

/// Runs `units` parallel units with `jobs` workers and checks that exactly `bound` of them were
/// ever running at once.
fn check_peak_in_flight(units: usize, jobs: usize, bound: usize) -> Result<()> {
    let project = Project::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for index in 0..units {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        project
            .loader
            .add_unit(format!("pkg.busy_test.test_{index}"), move |_| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ExecutionOutcome::pass()
            });
    }

    let output = project.run(RunOptions {
        jobs: Some(jobs),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    assert_eq!(output.result_set.len(), units);
    // Every worker slot is filled before any result comes back.
    assert_eq!(peak.load(Ordering::SeqCst), bound);
    assert!(
        output
            .result_set
            .results()
            .iter()
            .all(|result| (1..=bound).contains(&result.worker))
    );
    Ok(())
}

#[test]
fn skip_results_come_before_dispatch() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_run");
    project.loader.add_passing("pkg.a_test.test_serial");
    project.loader.add_passing("pkg.a_test.test_skip_me");
    project.loader.add_passing("pkg.a_test.test_skip_me_too");

    let output = project.run(RunOptions {
        isolate: strings(&["*serial"]),
        skip: strings(&["*skip_me*"]),
        ..Default::default()
    })??;

    assert_eq!(outcomes(&output.result_set), vec![
        ("pkg.a_test.test_skip_me", ResultType::Skip),
        ("pkg.a_test.test_skip_me_too", ResultType::Skip),
        ("pkg.a_test.test_run", ResultType::Pass),
        ("pkg.a_test.test_serial", ResultType::Pass),
    ]);
    Ok(())
}

#[test]
fn hooks_run_once_per_worker() -> Result<()> {
    let project = Project::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    for index in 0..6 {
        let seen = seen.clone();
        project
            .loader
            .add_unit(format!("pkg.hooks_test.test_{index}"), move |cx| {
                seen.lock().unwrap().push(cx.context.clone());
                ExecutionOutcome::pass()
            });
    }
    project.loader.add_passing("pkg.hooks_test.serial");
    let hooks = Arc::new(RecordingHooks::default());

    let output = project
        .orchestrator(RunOptions {
            jobs: Some(2),
            isolate: strings(&["*.serial"]),
            ..Default::default()
        })?
        .with_hooks(hooks.clone())
        .with_context(serde_json::json!({ "db": "sqlite://memory" }))
        .run()?;
    assert_eq!(output.exit_code, UnitrunExitCode::OK);

    // Two parallel workers plus one isolated worker.
    let mut setups = hooks.setups.lock().unwrap().clone();
    let mut teardowns = hooks.teardowns.lock().unwrap().clone();
    setups.sort_unstable();
    teardowns.sort_unstable();
    assert_eq!(setups, vec![1, 1, 2]);
    assert_eq!(teardowns, setups);

    for context in seen.lock().unwrap().iter() {
        assert_eq!(context["db"], "sqlite://memory");
        assert!(context["worker"].is_u64());
    }
    Ok(())
}

#[test]
fn list_only_prints_names() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.b_test.test_two");
    project.loader.add_passing("pkg.a_test.test_one");
    project.loader.add_passing("pkg.a_test.test_skipped");

    let output = project.run(RunOptions {
        list_only: true,
        skip: strings(&["*skipped"]),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    assert!(output.full_results.is_none());
    assert_eq!(
        project.host.stdout(),
        "pkg.a_test.test_one\npkg.a_test.test_skipped\npkg.b_test.test_two\n"
    );
    assert_eq!(project.loader.runs("pkg.a_test.test_one"), 0);
    Ok(())
}

#[test]
fn version_short_circuits() -> Result<()> {
    let project = Project::new();
    let output = project.run(RunOptions {
        version: true,
        ..Default::default()
    })??;
    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    assert_eq!(
        project.host.stdout(),
        format!("{}\n", unitrun_runner::orchestrator::VERSION)
    );
    Ok(())
}

#[test]
fn names_from_stdin() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");
    project.loader.add_passing("pkg.a_test.test_two");
    project.host.set_stdin("pkg.a_test.test_two\n\n  \n");

    let output = project.run(RunOptions {
        file_list: Some("-".to_owned()),
        ..Default::default()
    })??;
    assert_eq!(outcomes(&output.result_set), vec![(
        "pkg.a_test.test_two",
        ResultType::Pass
    )]);
    Ok(())
}

#[test]
fn missing_file_list() -> Result<()> {
    let project = Project::new();
    let result = project.run(RunOptions {
        file_list: Some("names.txt".to_owned()),
        ..Default::default()
    })?;
    assert!(matches!(result, Err(RunError::ReadFileList(_))));
    Ok(())
}

#[test]
fn duplicate_names_collapse() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");
    project.loader.add_passing("pkg.a_test.test_two");

    let output = project.run(RunOptions {
        tests: strings(&["pkg.a_test.test_one", "pkg.a_test", "pkg.a_test.test_one"]),
        ..Default::default()
    })??;
    assert_eq!(output.result_set.len(), 2);
    assert_eq!(project.loader.runs("pkg.a_test.test_one"), 1);
    Ok(())
}

#[test]
fn dotted_names_of_directories_are_discovered() -> Result<()> {
    let project = Project::new();
    project.host.add_dir("pkg/sub");
    project.loader.add_passing("pkg.sub.c_test.test_one");
    project.loader.add_passing("pkg.sub.helpers.test_ignored");
    project.loader.add_passing("pkg.other_test.test_two");

    let output = project.run(RunOptions {
        tests: strings(&["pkg.sub"]),
        ..Default::default()
    })??;
    assert_eq!(outcomes(&output.result_set), vec![(
        "pkg.sub.c_test.test_one",
        ResultType::Pass
    )]);
    Ok(())
}

#[test]
fn dry_run_executes_nothing() -> Result<()> {
    let project = Project::new();
    project.loader.add_failing("pkg.a_test.test_one", "would fail");

    let output = project.run(RunOptions {
        dry_run: true,
        ..Default::default()
    })??;
    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    assert_eq!(project.loader.runs("pkg.a_test.test_one"), 0);
    Ok(())
}

#[test_case(true, 0 ; "verbose output shows passing output")]
#[test_case(false, 1 ; "quiet output shows only failures")]
fn failure_output_is_always_shown(verbose: bool, retry_limit: usize) {
    let project = Project::new();
    project.loader.add_unit("pkg.a_test.test_noisy", |cx| {
        cx.output
            .write(unitrun_runner::host::OutputStream::Stdout, "noise\n");
        ExecutionOutcome::pass()
    });
    project.loader.add_failing("pkg.a_test.test_bad", "kaboom\n");

    project
        .run(RunOptions {
            verbose: if verbose { 2 } else { 0 },
            quiet: !verbose,
            retry_limit: Some(retry_limit),
            ..Default::default()
        })
        .expect("configuration is valid")
        .expect("run completes");

    let stdout = project.host.stdout();
    assert!(stdout.contains("pkg.a_test.test_bad failed unexpectedly:\n  kaboom\n"));
    assert_eq!(stdout.contains("  noise\n"), verbose, "stdout: {stdout}");
}

#[test]
fn upload_failure_fails_the_run() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");
    project.host.set_fetch_response(500, "server on fire");

    let output = project.run(RunOptions {
        upload_to: Some("results.example.com".to_owned()),
        upload_builder: Some("linux".to_owned()),
        upload_source: Some("ci".to_owned()),
        upload_kind: Some("unit".to_owned()),
        write_full_results_to: Some("full.json".into()),
        ..Default::default()
    })??;

    assert_eq!(output.exit_code, UnitrunExitCode::FAILURE);
    let requests = project.host.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "http://results.example.com/testfile/upload");
    // Local artifacts are still written.
    assert!(project.host.file("full.json").is_some());
    Ok(())
}

#[test]
fn upload_success() -> Result<()> {
    let project = Project::new();
    project.loader.add_passing("pkg.a_test.test_one");

    let output = project.run(RunOptions {
        upload_to: Some("results.example.com".to_owned()),
        upload_builder: Some("linux".to_owned()),
        upload_source: Some("ci".to_owned()),
        upload_kind: Some("unit".to_owned()),
        ..Default::default()
    })??;
    assert_eq!(output.exit_code, UnitrunExitCode::OK);
    assert_eq!(project.host.requests().len(), 1);
    Ok(())
}

#[proptest(cases = 16)]
fn exit_code_reflects_failures(
    #[strategy(proptest::collection::vec(proptest::bool::ANY, 1..6))] passes: Vec<bool>,
) {
    let project = Project::new();
    for (index, pass) in passes.iter().enumerate() {
        let name = format!("pkg.prop_test.test_{index}");
        if *pass {
            project.loader.add_passing(name);
        } else {
            project.loader.add_failing(name, "no");
        }
    }

    let output = project
        .run(RunOptions {
            jobs: Some(3),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    let full_results = output.full_results.unwrap();
    let failures = passes.iter().filter(|pass| !**pass).count();
    assert_eq!(full_results.count(FullResultsStatus::Fail), failures);
    assert_eq!(output.exit_code == UnitrunExitCode::OK, failures == 0);
}
