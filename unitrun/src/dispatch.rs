// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and the entry point of a run.

use crate::{
    Result,
    output::{OutputContext, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::{ArgAction, Args};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use unitrun_runner::{
    config::{RunConfig, RunOptions},
    host::{Host, RealHost},
    loader::script::ScriptLoader,
    orchestrator::Orchestrator,
    signal::SignalHandlerKind,
};

/// Runs test units in parallel, retries failures, and records the results.
///
/// Units are named by dotted name, by file, or by directory. With no names, every unit below
/// the current directory is run.
#[derive(Debug, clap::Parser)]
#[command(
    name = "unitrun",
    disable_version_flag = true,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct UnitrunApp {
    /// Unit names, files or directories to run
    #[arg(value_name = "TESTS")]
    tests: Vec<String>,

    /// Print the version and exit
    #[arg(short = 'V', long)]
    version: bool,

    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    selection: SelectionOpts,

    #[clap(flatten)]
    runner: RunnerOpts,

    #[clap(flatten)]
    reporter: ReporterOpts,

    #[clap(flatten)]
    results: ResultsOpts,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Selection options")]
struct SelectionOpts {
    /// Read unit names from FILE, one per line, or from standard input if `-`
    #[arg(short = 'f', long, value_name = "FILE")]
    file_list: Option<String>,

    /// Run units matching GLOB one at a time (may be repeated)
    #[arg(long, value_name = "GLOB")]
    isolate: Vec<String>,

    /// Don't run units matching GLOB (may be repeated)
    #[arg(long, value_name = "GLOB")]
    skip: Vec<String>,

    /// Globs of file names to discover units in (may be repeated)
    /// [default: *_test.*, *_unittest.*]
    #[arg(long, value_name = "GLOB")]
    suffixes: Vec<String>,

    /// List units instead of running them
    #[arg(short = 'l', long)]
    list_only: bool,

    /// The top-level directory of the project [default: found by walking upward]
    #[arg(long, value_name = "DIR")]
    top_level_dir: Option<Utf8PathBuf>,

    /// The configuration file [default: .config/unitrun.toml in the top-level directory]
    #[arg(long, value_name = "FILE", env = "UNITRUN_CONFIG_FILE")]
    config_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of units to run simultaneously [default: logical CPU count]
    #[arg(short = 'j', long, value_name = "N", env = "UNITRUN_JOBS")]
    jobs: Option<usize>,

    /// Report units without running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Don't capture the output of units
    #[arg(long)]
    passthrough: bool,

    /// Number of times to retry failed units
    #[arg(long, value_name = "N", env = "UNITRUN_RETRIES")]
    retry_limit: Option<usize>,

    /// The maximum time a single unit may run for (e.g. 30s, 5m)
    #[arg(long, value_name = "DURATION", value_parser = non_zero_duration)]
    timeout: Option<Duration>,

    /// A JSON value passed to every worker
    #[arg(long, value_name = "JSON")]
    context: Option<String>,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Reporter options")]
struct ReporterOpts {
    /// Only print failures
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Print more information: once to list every unit, twice to show passing output
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// The status prefix template [default: `[%f/%t] `, or UNITRUN_STATUS if set]
    #[arg(short = 's', long, value_name = "FORMAT")]
    status_format: Option<String>,

    /// Print how long each unit took
    #[arg(short = 't', long)]
    timing: bool,

    /// The width to elide progress lines to [default: terminal width]
    #[arg(long, value_name = "N")]
    terminal_width: Option<usize>,

    /// Overwrite the progress line [default: if stdout is a terminal and not verbose]
    #[arg(long, overrides_with = "no_overwrite")]
    overwrite: bool,

    /// Print each progress update on its own line
    #[arg(long, overrides_with = "overwrite")]
    no_overwrite: bool,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Results options")]
struct ResultsOpts {
    /// Extra KEY=VALUE pairs to record with the results (may be repeated)
    #[arg(long, value_name = "KEY=VALUE")]
    metadata: Vec<String>,

    /// Write the full-results document to FILE
    #[arg(long, value_name = "FILE")]
    write_full_results_to: Option<Utf8PathBuf>,

    /// Write a Chrome trace of the run to FILE
    #[arg(long, value_name = "FILE")]
    write_trace_to: Option<Utf8PathBuf>,

    /// Upload the full-results document to SERVER
    #[arg(long, value_name = "SERVER")]
    upload_to: Option<String>,

    /// The builder name to upload under
    #[arg(long, value_name = "NAME")]
    upload_builder: Option<String>,

    /// The source name to upload under
    #[arg(long, value_name = "NAME")]
    upload_source: Option<String>,

    /// The kind of run to upload as
    #[arg(long, value_name = "KIND")]
    upload_kind: Option<String>,
}

impl UnitrunApp {
    /// Initializes logging and colors.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let opts = self.into_run_options(output);
        let host: Arc<dyn Host> = Arc::new(RealHost::new());
        let config = RunConfig::resolve(opts, &*host)?;
        debug!(
            top_level_dir = %config.top_level_dir,
            jobs = config.jobs,
            "resolved configuration"
        );

        let loader = Arc::new(ScriptLoader::new(
            host.clone(),
            config.top_level_dir.clone(),
            config.suffix_globs.clone(),
        ));
        let output = Orchestrator::new(host, loader, config)
            .with_signal_handler(SignalHandlerKind::Standard)
            .run()?;
        Ok(output.exit_code)
    }

    fn into_run_options(self, output: OutputContext) -> RunOptions {
        let Self {
            tests,
            version,
            output: _,
            selection,
            runner,
            reporter,
            results,
        } = self;

        let overwrite = match (reporter.overwrite, reporter.no_overwrite) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        RunOptions {
            version,
            tests,
            file_list: selection.file_list,
            isolate: selection.isolate,
            skip: selection.skip,
            suffixes: selection.suffixes,
            jobs: runner.jobs,
            list_only: selection.list_only,
            dry_run: runner.dry_run,
            quiet: reporter.quiet,
            status_format: reporter.status_format,
            timing: reporter.timing,
            verbose: reporter.verbose,
            passthrough: runner.passthrough,
            retry_limit: runner.retry_limit,
            terminal_width: reporter.terminal_width,
            overwrite,
            metadata: results.metadata,
            write_full_results_to: results.write_full_results_to,
            write_trace_to: results.write_trace_to,
            upload_to: results.upload_to,
            upload_builder: results.upload_builder,
            upload_source: results.upload_source,
            upload_kind: results.upload_kind,
            top_level_dir: selection.top_level_dir,
            config_file: selection.config_file,
            context: runner.context,
            timeout: runner.timeout,
            colorize: output.colorize_stdout(),
        }
    }
}

fn non_zero_duration(input: &str) -> std::result::Result<Duration, String> {
    let duration = humantime::parse_duration(input).map_err(|error| error.to_string())?;
    if duration.is_zero() {
        Err("duration must be non-zero".to_owned())
    } else {
        Ok(duration)
    }
}
