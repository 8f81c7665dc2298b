// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The top-level sequencing of a run.
//!
//! An [`Orchestrator`] is created with a resolved [`RunConfig`] and consumed by
//! [`Orchestrator::run`]. A run goes through discovery, execution, retries and reporting, in
//! that order.

use crate::{
    artifacts::{RunPhases, make_full_results, make_trace, make_upload_request, write_json},
    classifier::{Classifier, DefaultClassifier},
    config::RunConfig,
    errors::{
        ArtifactKind, DiscoveryError, LoadError, ReadFileListError, RunError, UploadError,
        WriteArtifactError,
    },
    host::{Host, OutputStream},
    loader::{Loader, Unit, path_to_name},
    reporter::Reporter,
    results::ResultSet,
    runner::{RetryController, Scheduler},
    signal::SignalHandlerKind,
    stats::Stats,
    test_set::{Instrumentation, TestInput, TestSet, WorkerHooks},
};
use camino::Utf8Path;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};
use tracing::{debug, error};
use unitrun_metadata::{
    FullResults, NameConflictError, PATH_DELIMITER, TraceDocument, UnitrunExitCode,
};

/// The version string printed for `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a completed run produced.
#[derive(Debug)]
pub struct RunOutput {
    /// The process exit code.
    pub exit_code: i32,

    /// The full-results document, if units were executed.
    pub full_results: Option<FullResults>,

    /// The trace document, if units were executed.
    pub trace: Option<TraceDocument>,

    /// Every result produced, in the order it was produced.
    pub result_set: ResultSet,

    /// True if the run was interrupted.
    pub interrupted: bool,
}

impl RunOutput {
    fn without_results(exit_code: i32) -> Self {
        Self {
            exit_code,
            full_results: None,
            trace: None,
            result_set: ResultSet::new(),
            interrupted: false,
        }
    }
}

/// Sequences a run: discovery, execution, retries and reporting.
pub struct Orchestrator {
    host: Arc<dyn Host>,
    loader: Arc<dyn Loader>,
    config: RunConfig,
    classifier: Option<Arc<dyn Classifier>>,
    hooks: Option<Arc<dyn WorkerHooks>>,
    instrumentation: Option<Arc<dyn Instrumentation>>,
    test_set: Option<TestSet>,
    signal_handler: SignalHandlerKind,
}

impl Orchestrator {
    /// Creates a new orchestrator.
    ///
    /// By default units are classified with a [`DefaultClassifier`] built from the configured
    /// globs, and no signal handler is installed.
    pub fn new(host: Arc<dyn Host>, loader: Arc<dyn Loader>, config: RunConfig) -> Self {
        Self {
            host,
            loader,
            config,
            classifier: None,
            hooks: None,
            instrumentation: None,
            test_set: None,
            signal_handler: SignalHandlerKind::Noop,
        }
    }

    /// Replaces the default classification policy.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Sets the hooks run once per worker.
    pub fn with_hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Replaces the run context from the configuration.
    pub fn with_context(mut self, context: Value) -> Self {
        self.config.context = context;
        self
    }

    /// Sets per-worker instrumentation.
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    /// Runs a prepared set instead of discovering one.
    pub fn with_test_set(mut self, test_set: TestSet) -> Self {
        self.test_set = Some(test_set);
        self
    }

    /// Sets the kind of signal handler installed for the run.
    pub fn with_signal_handler(mut self, kind: SignalHandlerKind) -> Self {
        self.signal_handler = kind;
        self
    }

    /// Performs the run.
    ///
    /// Failing units don't make this return an error: they are reflected in
    /// [`RunOutput::exit_code`]. Errors are reserved for runs that could not complete.
    pub fn run(mut self) -> Result<RunOutput, RunError> {
        let host = self.host.clone();
        if self.config.version {
            host.print(OutputStream::Stdout, &format!("{VERSION}\n"));
            return Ok(RunOutput::without_results(UnitrunExitCode::OK));
        }

        let signal_handler = self.signal_handler.build()?;
        let started = host.time();
        let mut stats = Stats::new(self.config.status_format.clone(), started, self.config.jobs);

        let test_set = match self.test_set.take() {
            Some(test_set) => test_set,
            None => self.find_tests()?,
        };
        let discovered = host.time();

        if test_set.runnable_count() == 0 {
            return Err(RunError::NoTestsToRun);
        }
        let mut all_tests: Vec<String> =
            test_set.iter_all().map(|input| input.name.clone()).collect();
        all_tests.sort_unstable();
        check_name_conflicts(&all_tests)?;

        if self.config.list_only {
            let mut listing = all_tests.join("\n");
            listing.push('\n');
            host.print(OutputStream::Stdout, &listing);
            return Ok(RunOutput::without_results(UnitrunExitCode::OK));
        }

        let mut reporter = Reporter::new(host.clone(), self.config.display);
        let mut result_set = ResultSet::new();
        let interrupted = {
            let mut scheduler =
                Scheduler::new(host.clone(), self.loader.clone(), &mut reporter, &signal_handler);
            scheduler.instrumentation = self.instrumentation.clone();
            scheduler.passthrough = self.config.passthrough;
            scheduler.dry_run = self.config.dry_run;

            stats.total = test_set.len();
            scheduler.run_one_set(&mut stats, &mut result_set, &test_set, self.config.jobs)?;

            let mut retries = RetryController::new(
                self.config.retry_limit,
                self.config.status_format.clone(),
                self.config.timeout,
            );
            retries.run(&mut scheduler, &test_set, &mut result_set)?;
            scheduler.interrupted()
        };

        let full_results = make_full_results(
            &result_set,
            &all_tests,
            &self.config.metadata,
            host.time(),
            interrupted,
        )?;
        let mut exit_code = full_results.exit_code();
        let tested = host.time();

        reporter.summarize(stats.finished, full_results.num_failures(), stats.started_time());

        if let Some(path) = &self.config.write_full_results_to {
            write_json(&*host, ArtifactKind::FullResults, path, &full_results)?;
        }
        if let Err(err) = self.upload(&full_results)? {
            error!("{err}");
            if exit_code == UnitrunExitCode::OK {
                exit_code = UnitrunExitCode::FAILURE;
            }
        }

        let phases = RunPhases {
            started,
            discovered,
            tested,
            finished: host.time(),
        };
        let trace = make_trace(&result_set, &self.config.metadata, &phases, host.pid());
        if let Some(path) = &self.config.write_trace_to {
            write_json(&*host, ArtifactKind::Trace, path, &trace)?;
        }

        if let Some(report) = self
            .instrumentation
            .as_ref()
            .and_then(|instrumentation| instrumentation.report())
        {
            reporter.println("");
            reporter.println(&report);
        }

        if interrupted {
            exit_code = UnitrunExitCode::INTERRUPTED;
        }
        debug!(exit_code, results = result_set.len(), "run complete");

        Ok(RunOutput {
            exit_code,
            full_results: Some(full_results),
            trace: Some(trace),
            result_set,
            interrupted,
        })
    }

    /// Uploads results if an upload target is configured.
    ///
    /// The outer error is for documents that can't be encoded; the inner one for uploads that
    /// didn't succeed, which don't stop the run.
    fn upload(
        &self,
        full_results: &FullResults,
    ) -> Result<Result<(), UploadError>, WriteArtifactError> {
        let Some(target) = &self.config.upload else {
            return Ok(Ok(()));
        };
        let request = make_upload_request(target, full_results).map_err(|err| {
            WriteArtifactError::Serialize {
                kind: ArtifactKind::FullResults,
                err,
            }
        })?;
        debug!(url = %request.url, "uploading full results");

        let outcome = match self.host.fetch(&request) {
            Ok(response) if response.status == 200 => Ok(()),
            Ok(response) => Err(UploadError::Status {
                url: request.url,
                status: response.status,
                body: response.body,
            }),
            Err(err) => Err(UploadError::Transport {
                url: request.url,
                err,
            }),
        };
        Ok(outcome)
    }

    fn find_tests(&self) -> Result<TestSet, RunError> {
        let mut test_set = TestSet::new(Arc::new(self.config.context.clone()), self.hooks.clone());
        let classifier = self.classifier.clone().unwrap_or_else(|| {
            Arc::new(DefaultClassifier::new(
                self.config.skip.clone(),
                self.config.isolate.clone(),
            ))
        });

        let mut seen = HashSet::new();
        for name in self.name_list()? {
            let units = self
                .units_for(&name)
                .map_err(|err| DiscoveryError::new(name.as_str(), err))?;
            debug!(%name, units = units.len(), "discovered units");
            for unit in units {
                // The first classification of a name wins.
                if seen.insert(unit.id().to_owned()) {
                    let input =
                        TestInput::new(unit.id()).with_timeout(self.config.timeout);
                    classifier.classify(&mut test_set, input);
                }
            }
        }

        test_set.sort();
        Ok(test_set)
    }

    fn name_list(&self) -> Result<Vec<String>, ReadFileListError> {
        if !self.config.tests.is_empty() {
            return Ok(self.config.tests.clone());
        }
        let Some(file_list) = &self.config.file_list else {
            return Ok(vec![".".to_owned()]);
        };
        let contents = if file_list == "-" {
            self.host.read_stdin()
        } else {
            self.host.read_text_file(Utf8Path::new(file_list))
        }
        .map_err(|err| ReadFileListError::new(file_list.as_str(), err))?;

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Turns one name from the command line into units: a file is resolved by its dotted name,
    /// a directory (given as a path or as a dotted name) is discovered, and anything else is
    /// resolved directly.
    fn units_for(&self, name: &str) -> Result<Vec<Arc<dyn Unit>>, LoadError> {
        let top_level_dir = &self.config.top_level_dir;
        let path = Utf8Path::new(name);

        if self.host.is_file(path) {
            let cwd = self.host.cwd().map_err(|err| LoadError::Io {
                path: path.to_owned(),
                err,
            })?;
            let absolute = cwd.join(path);
            let relative = absolute.strip_prefix(top_level_dir).map_err(|_| {
                LoadError::custom(format!(
                    "{absolute} is not under the top-level directory {top_level_dir}"
                ))
            })?;
            return self.loader.resolve(&path_to_name(relative));
        }

        if self.host.is_dir(path) {
            let cwd = self.host.cwd().map_err(|err| LoadError::Io {
                path: path.to_owned(),
                err,
            })?;
            return self.discover(&cwd.join(path));
        }

        let possible_dir = top_level_dir.join(name.replace('.', "/"));
        if self.host.is_dir(&possible_dir) {
            return self.discover(&possible_dir);
        }
        self.loader.resolve(name)
    }

    fn discover(&self, dir: &Utf8Path) -> Result<Vec<Arc<dyn Unit>>, LoadError> {
        let mut units = Vec::new();
        for suffix in &self.config.suffixes {
            units.extend(
                self.loader
                    .discover(dir, suffix, &self.config.top_level_dir)?,
            );
        }
        Ok(units)
    }
}

/// Fails if any name is another name followed by further dotted segments. Such a pair can't be
/// recorded in the full-results tree, where a name is either a result or a directory.
fn check_name_conflicts(names: &[String]) -> Result<(), NameConflictError> {
    let names: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    for name in &names {
        let children = format!("{name}{PATH_DELIMITER}");
        // Every name starting with `children` sorts at or after it.
        if let Some(child) = names
            .range::<&str, _>(children.as_str()..)
            .next()
            .filter(|other| other.starts_with(&children))
        {
            return Err(NameConflictError::new(*child, *name));
        }
    }
    Ok(())
}
