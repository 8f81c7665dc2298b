// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the `unitrun` binary against temporary projects.

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, eyre};
use pretty_assertions::assert_eq;
use std::process::Output;
use unitrun_metadata::UnitrunExitCode;

fn unitrun(dir: &Utf8Path, args: &[&str]) -> Result<Output> {
    let output = duct::cmd(env!("CARGO_BIN_EXE_unitrun"), args)
        .dir(dir)
        .env("UNITRUN_COLOR", "never")
        .env_remove("UNITRUN_STATUS")
        .env_remove("UNITRUN_LOG")
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()?;
    Ok(output)
}

fn exit_code(output: &Output) -> Result<i32> {
    output
        .status
        .code()
        .ok_or_else(|| eyre!("unitrun was killed by a signal"))
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn malformed_metadata_is_a_configuration_error() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let output = unitrun(dir.path(), &["--metadata", "nokey"])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::CONFIGURATION_ERROR);
    assert!(
        stderr(&output).contains("error: malformed --metadata \"nokey\" (expected key=value)"),
        "unexpected stderr: {}",
        stderr(&output)
    );
    Ok(())
}

#[test]
fn upload_requires_companion_fields() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let output = unitrun(
        dir.path(),
        &["--upload-to", "results.example", "--upload-builder", "linux"],
    )?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::CONFIGURATION_ERROR);
    assert!(stderr(&output).contains("--upload-source must be specified along with --upload-to"));
    Ok(())
}

#[test]
fn zero_jobs_is_a_configuration_error() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let output = unitrun(dir.path(), &["--jobs", "0"])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::CONFIGURATION_ERROR);
    Ok(())
}

#[test]
fn bad_config_file_is_a_configuration_error() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    std::fs::create_dir(dir.path().join(".config"))?;
    std::fs::write(dir.path().join(".config/unitrun.toml"), "retry-limit = \"lots\"\n")?;
    let output = unitrun(dir.path(), &[])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::CONFIGURATION_ERROR);
    assert!(stderr(&output).contains("failed to parse config file"));
    Ok(())
}

#[test]
fn empty_project_has_no_tests_to_run() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let output = unitrun(dir.path(), &[])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::FAILURE);
    assert!(stderr(&output).contains("No tests to run."));
    Ok(())
}

#[test]
fn version_prints_and_exits() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let output = unitrun(dir.path(), &["--version"])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::OK);
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("{}\n", env!("CARGO_PKG_VERSION"))
    );
    Ok(())
}

#[test]
fn version_ignores_broken_config_file() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    std::fs::create_dir(dir.path().join(".config"))?;
    std::fs::write(dir.path().join(".config/unitrun.toml"), "retry-limit = \"lots\"\n")?;
    let output = unitrun(dir.path(), &["--version"])?;
    assert_eq!(exit_code(&output)?, UnitrunExitCode::OK, "{}", stderr(&output));
    Ok(())
}

#[cfg(unix)]
mod scripts {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Result<()> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[test]
    fn scripts_run_and_results_are_written() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        write_script(dir.path(), "pkg/pass_test.sh", "exit 0")?;
        write_script(dir.path(), "pkg/fail_test.sh", "echo broken >&2; exit 1")?;
        write_script(dir.path(), "pkg/skip_test.sh", "exit 77")?;
        write_script(dir.path(), "pkg/helper.sh", "exit 1")?;

        let output = unitrun(
            dir.path(),
            &[
                "--jobs",
                "2",
                "--no-overwrite",
                "--metadata",
                "bot=ci",
                "--write-full-results-to",
                "full_results.json",
                "--write-trace-to",
                "trace.json",
            ],
        )?;
        assert_eq!(exit_code(&output)?, UnitrunExitCode::FAILURE, "{}", stderr(&output));

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("pkg.fail_test failed"), "stdout: {stdout}");
        assert!(stdout.contains("  broken"), "stdout: {stdout}");
        assert!(!stdout.contains("pkg.helper"), "stdout: {stdout}");

        let full: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("full_results.json"))?)?;
        assert_eq!(full["num_failures_by_type"]["FAIL"], 1);
        assert_eq!(full["num_failures_by_type"]["PASS"], 1);
        assert_eq!(full["num_failures_by_type"]["SKIP"], 1);
        assert_eq!(full["metadata"]["bot"], "ci");
        assert_eq!(full["tests"]["pkg"]["fail_test"]["actual"], "FAIL");

        let trace: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("trace.json"))?)?;
        assert_eq!(trace["otherData"]["bot"], "ci");
        Ok(())
    }

    #[test]
    fn list_only_lists_discovered_units() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        write_script(dir.path(), "b_test.sh", "exit 0")?;
        write_script(dir.path(), "sub/a_unittest.sh", "exit 0")?;

        let output = unitrun(dir.path(), &["--list-only"])?;
        assert_eq!(exit_code(&output)?, UnitrunExitCode::OK);
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "b_test\nsub.a_unittest\n"
        );
        Ok(())
    }

    #[test]
    fn retries_rerun_failures() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        // Fails the first time it runs, passes afterwards.
        write_script(
            dir.path(),
            "flaky_test.sh",
            "if [ -e ran ]; then exit 0; fi\ntouch ran\nexit 1",
        )?;

        let output = unitrun(
            dir.path(),
            &["--retry-limit", "2", "--write-full-results-to", "out.json"],
        )?;
        assert_eq!(exit_code(&output)?, UnitrunExitCode::OK, "{}", stderr(&output));
        assert!(
            String::from_utf8_lossy(&output.stdout)
                .contains("Retrying failed tests (attempt #1 of 2)...")
        );

        let full: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out.json"))?)?;
        assert_eq!(full["tests"]["flaky_test"]["actual"], "FAIL PASS");
        Ok(())
    }

    #[test]
    fn prefix_script_names_are_rejected() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        write_script(dir.path(), "pkg/a_test.sh", "exit 0")?;
        write_script(dir.path(), "pkg/a_test/b_test.sh", "exit 0")?;

        let output = unitrun(dir.path(), &[])?;
        assert_eq!(exit_code(&output)?, UnitrunExitCode::FAILURE);
        assert!(
            stderr(&output).contains(
                "error: unit names `pkg.a_test.b_test` and `pkg.a_test` conflict: \
                 one is a prefix of the other"
            ),
            "unexpected stderr: {}",
            stderr(&output)
        );
        Ok(())
    }

    #[test]
    fn directory_outside_top_level_dir_is_a_discovery_error() -> Result<()> {
        let dir = Utf8TempDir::new()?;
        let elsewhere = Utf8TempDir::new()?;
        write_script(elsewhere.path(), "a_test.sh", "exit 0")?;

        let output = unitrun(
            dir.path(),
            &["--top-level-dir", ".", elsewhere.path().as_str()],
        )?;
        assert_eq!(exit_code(&output)?, UnitrunExitCode::FAILURE);
        let stderr = stderr(&output);
        assert!(stderr.contains("is not under the top-level directory"), "stderr: {stderr}");
        assert!(!stderr.contains("No tests to run."), "stderr: {stderr}");
        Ok(())
    }
}
