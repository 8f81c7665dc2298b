// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single worker and its lifecycle.

use crate::{
    errors::HookError,
    host::{Host, OutputCapture},
    loader::{Loader, Unit, UnitContext},
    results::{ExecutionOutcome, ResultTiming, TestResult},
    test_set::{Instrumentation, TestInput, WorkerHooks, WorkerInfo},
};
use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use std::{
    any::Any,
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::SystemTime,
};
use tracing::debug;

/// Everything a worker needs, cloned into each worker when the pool starts.
#[derive(Clone)]
pub(crate) struct Child {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) loader: Arc<dyn Loader>,
    pub(crate) context: Arc<Value>,
    pub(crate) hooks: Option<Arc<dyn WorkerHooks>>,
    pub(crate) instrumentation: Option<Arc<dyn Instrumentation>>,
    pub(crate) passthrough: bool,
    pub(crate) dry_run: bool,
}

/// A message from a worker to the pool.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// A unit finished.
    Finished(TestResult),

    /// The worker has torn down and will not send anything else.
    Exited(WorkerExit),
}

/// How a worker shut down.
#[derive(Clone, Debug)]
pub(crate) struct WorkerExit {
    pub(crate) worker_id: usize,
    pub(crate) units_run: usize,
    pub(crate) teardown_error: Option<HookError>,
}

/// The lifecycle of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Created,
    Ready,
    Active,
    Draining,
    Terminated,
}

pub(crate) struct Worker {
    child: Child,
    info: WorkerInfo,
    state: WorkerState,
    context_after_setup: Option<Value>,
    setup_error: Option<HookError>,
    // Groups loaded while walking dotted names, cached for the lifetime of the worker.
    loaded_groups: HashMap<String, Option<Vec<Arc<dyn Unit>>>>,
    units_run: usize,
}

impl Worker {
    pub(crate) fn new(child: Child, worker_id: usize) -> Self {
        let info = WorkerInfo {
            worker_id,
            pid: child.host.pid(),
        };
        Self {
            child,
            info,
            state: WorkerState::Created,
            context_after_setup: None,
            setup_error: None,
            loaded_groups: HashMap::new(),
            units_run: 0,
        }
    }

    /// The worker thread's main loop: set up, run units until the request channel closes, tear
    /// down.
    pub(crate) fn run(
        mut self,
        requests: Receiver<TestInput>,
        responses: Sender<WorkerMessage>,
    ) {
        self.set_up();
        for input in requests {
            self.transition(WorkerState::Active);
            let result = self.run_one(&input);
            self.transition(WorkerState::Ready);
            if responses.send(WorkerMessage::Finished(result)).is_err() {
                // The pool is gone.
                break;
            }
        }
        let exit = self.tear_down();
        let _ = responses.send(WorkerMessage::Exited(exit));
    }

    fn transition(&mut self, state: WorkerState) {
        debug!(
            worker_id = self.info.worker_id,
            from = ?self.state,
            to = ?state,
            "worker state transition",
        );
        self.state = state;
    }

    pub(crate) fn set_up(&mut self) {
        if let Some(instrumentation) = &self.child.instrumentation {
            instrumentation.start(&self.info);
        }
        if let Some(hooks) = &self.child.hooks {
            let res = catch_unwind(AssertUnwindSafe(|| {
                hooks.setup(&self.info, &self.child.context)
            }));
            match res {
                Ok(Ok(context)) => self.context_after_setup = Some(context),
                Ok(Err(err)) => self.setup_error = Some(err),
                Err(panic) => {
                    self.setup_error = Some(HookError::new(format!(
                        "setup hook panicked: {}",
                        panic_message(&*panic)
                    )))
                }
            }
        }
        self.transition(WorkerState::Ready);
    }

    pub(crate) fn tear_down(&mut self) -> WorkerExit {
        self.transition(WorkerState::Draining);
        let mut teardown_error = None;
        if let (Some(hooks), None) = (&self.child.hooks, &self.setup_error) {
            let context = self.context();
            let res = catch_unwind(AssertUnwindSafe(|| hooks.teardown(&self.info, context)));
            teardown_error = match res {
                Ok(res) => res.err(),
                Err(panic) => Some(HookError::new(format!(
                    "teardown hook panicked: {}",
                    panic_message(&*panic)
                ))),
            };
        }
        if let Some(instrumentation) = &self.child.instrumentation {
            instrumentation.stop(&self.info);
        }
        self.loaded_groups.clear();
        self.transition(WorkerState::Terminated);
        WorkerExit {
            worker_id: self.info.worker_id,
            units_run: self.units_run,
            teardown_error,
        }
    }

    fn context(&self) -> &Value {
        self.context_after_setup
            .as_ref()
            .unwrap_or(&*self.child.context)
    }

    /// Runs a single unit. Never panics: every failure becomes a result.
    pub(crate) fn run_one(&mut self, input: &TestInput) -> TestResult {
        self.units_run += 1;
        let host = self.child.host.clone();
        let started = host.time();
        let mut output = OutputCapture::begin(&host, !self.child.passthrough);

        let info = self.info;
        let timing = |took_until: SystemTime| ResultTiming {
            started,
            took: took_until.duration_since(started).unwrap_or_default(),
            worker: info.worker_id,
            pid: info.pid,
        };

        if let Some(err) = &self.setup_error {
            let (out, err_text) = output.restore();
            return TestResult::infrastructure_failure(
                input.name.clone(),
                timing(host.time()),
                out,
                format!("{err_text}worker setup failed: {err}"),
            );
        }

        let unit = match self.resolve(&input.name) {
            Ok(unit) => unit,
            Err(message) => {
                let (out, err_text) = output.restore();
                return TestResult::infrastructure_failure(
                    input.name.clone(),
                    timing(host.time()),
                    out,
                    format!("{err_text}failed to load {}: {message}", input.name),
                );
            }
        };

        let outcome = if self.child.dry_run {
            ExecutionOutcome::pass()
        } else {
            let mut cx = UnitContext {
                worker: info,
                context: self.context(),
                output: &mut output,
                timeout: input.timeout,
            };
            catch_unwind(AssertUnwindSafe(|| unit.run(&mut cx))).unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                ExecutionOutcome::error(format!("{} panicked: {message}", input.name))
            })
        };

        let (out, err) = output.restore();
        let took_until = host.time();
        TestResult::from_outcome(input.name.clone(), &outcome, timing(took_until), out, err)
            .with_declared_expectations(&input.expected)
    }

    /// Resolves a name to exactly one unit, falling back to searching the groups named by each
    /// prefix of the name.
    fn resolve(&mut self, name: &str) -> Result<Arc<dyn Unit>, String> {
        let loader = self.child.loader.clone();
        let resolved = catch_unwind(AssertUnwindSafe(|| loader.resolve(name)))
            .unwrap_or_else(|panic| {
                Err(crate::errors::LoadError::custom(format!(
                    "loader panicked: {}",
                    panic_message(&*panic)
                )))
            });
        let mut units = match resolved {
            Ok(units) => units,
            Err(err) => match self.search_groups(name) {
                Some(unit) => vec![unit],
                None => return Err(err.to_string()),
            },
        };
        if units.len() != 1 {
            return Err(format!("expected 1 unit, found {}", units.len()));
        }
        Ok(units.remove(0))
    }

    fn search_groups(&mut self, name: &str) -> Option<Arc<dyn Unit>> {
        let mut segments: Vec<_> = name.split('.').collect();
        while !segments.is_empty() {
            let prefix = segments.join(".");
            let loader = self.child.loader.clone();
            let members = self.loaded_groups.entry(prefix).or_insert_with_key(|prefix| {
                match catch_unwind(AssertUnwindSafe(|| loader.load_group(prefix))) {
                    Ok(Ok(members)) => members,
                    Ok(Err(err)) => {
                        debug!(group = %prefix, "failed to load group: {err}");
                        None
                    }
                    Err(_) => None,
                }
            });
            if let Some(unit) = members
                .iter()
                .flatten()
                .find(|unit| unit.id() == name)
            {
                return Some(unit.clone());
            }
            segments.pop();
        }
        None
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "(non-string payload)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fakes::{FakeHost, FakeLoader},
        results::ResultType,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
        fail_setup: bool,
    }

    impl WorkerHooks for RecordingHooks {
        fn setup(&self, worker: &WorkerInfo, context: &Value) -> Result<Value, HookError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("setup {}", worker.worker_id));
            if self.fail_setup {
                return Err(HookError::new("no database"));
            }
            Ok(serde_json::json!({ "base": context.clone(), "worker": worker.worker_id }))
        }

        fn teardown(&self, worker: &WorkerInfo, context: &Value) -> Result<(), HookError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("teardown {} {}", worker.worker_id, context["worker"]));
            Ok(())
        }
    }

    fn child(loader: Arc<FakeLoader>, hooks: Option<Arc<dyn WorkerHooks>>) -> Child {
        Child {
            host: Arc::new(FakeHost::new()),
            loader,
            context: Arc::new(serde_json::json!("shared")),
            hooks,
            instrumentation: None,
            passthrough: false,
            dry_run: false,
        }
    }

    #[test]
    fn falls_back_to_enclosing_group() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_passing("pkg.mod.Case.test_a");
        loader.add_group_member("pkg.mod.Case.generated", |cx| {
            cx.output.write(crate::host::OutputStream::Stdout, "generated ran\n");
            ExecutionOutcome::pass()
        });

        let mut worker = Worker::new(child(loader.clone(), None), 1);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.mod.Case.generated"));
        assert_eq!(result.actual, ResultType::Pass);
        assert_eq!(result.out, "generated ran\n");
        assert_eq!(result.worker, 1);
        assert_eq!(loader.runs("pkg.mod.Case.generated"), 1);
        // Every prefix down to the matching group was tried, and cached.
        assert!(worker.loaded_groups.contains_key("pkg.mod.Case"));
        assert!(!worker.loaded_groups.contains_key("pkg.mod"));
        worker.tear_down();
    }

    #[test]
    fn unmatched_name_is_a_failure() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_passing("pkg.mod.Case.test_a");

        let mut worker = Worker::new(child(loader, None), 1);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.mod.Case.missing"));
        assert_eq!(result.actual, ResultType::Failure);
        assert!(result.unexpected);
        assert_eq!(result.code, 1);
        assert_eq!(
            result.err,
            "failed to load pkg.mod.Case.missing: no unit or group named `pkg.mod.Case.missing`"
        );
    }

    #[test]
    fn ambiguous_name_is_a_failure() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_passing("pkg.twice");
        loader.add_passing("pkg.twice");

        let mut worker = Worker::new(child(loader, None), 2);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.twice"));
        assert_eq!(result.actual, ResultType::Failure);
        assert_eq!(result.err, "failed to load pkg.twice: expected 1 unit, found 2");
    }

    #[test]
    fn panics_are_contained() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_unit("pkg.boom", |_| panic!("kaboom"));

        let mut worker = Worker::new(child(loader, None), 1);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.boom"));
        assert_eq!(result.actual, ResultType::Failure);
        assert_eq!(result.err, "pkg.boom panicked: kaboom");
    }

    #[test]
    fn hooks_run_once_per_worker() {
        let loader = Arc::new(FakeLoader::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        loader.add_unit("pkg.a", move |cx| {
            record.lock().unwrap().push(cx.context["worker"].clone());
            ExecutionOutcome::pass()
        });
        let hooks = Arc::new(RecordingHooks::default());

        let mut worker = Worker::new(child(loader, Some(hooks.clone())), 3);
        worker.set_up();
        for _ in 0..3 {
            worker.run_one(&TestInput::new("pkg.a"));
        }
        let exit = worker.tear_down();

        assert_eq!(exit.units_run, 3);
        assert!(exit.teardown_error.is_none());
        assert_eq!(worker.state, WorkerState::Terminated);
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["setup 3", "teardown 3 3"]);
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!(3); 3]);
    }

    #[test]
    fn failed_setup_fails_units_and_skips_teardown() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_passing("pkg.a");
        let hooks = Arc::new(RecordingHooks {
            fail_setup: true,
            ..Default::default()
        });

        let mut worker = Worker::new(child(loader.clone(), Some(hooks.clone())), 1);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.a"));
        worker.tear_down();

        assert_eq!(result.actual, ResultType::Failure);
        assert_eq!(result.err, "worker setup failed: no database");
        assert_eq!(loader.runs("pkg.a"), 0);
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["setup 1"]);
    }

    #[test]
    fn declared_expectations_decide_unexpected() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_failing("pkg.known_bad", "still broken");
        loader.add_passing("pkg.fixed");

        let mut worker = Worker::new(child(loader, None), 1);
        worker.set_up();
        let known_bad = worker.run_one(
            &TestInput::new("pkg.known_bad").with_expected([ResultType::Failure]),
        );
        let fixed =
            worker.run_one(&TestInput::new("pkg.fixed").with_expected([ResultType::Failure]));
        let undeclared = worker.run_one(&TestInput::new("pkg.fixed"));

        assert_eq!(known_bad.actual, ResultType::Failure);
        assert_eq!(known_bad.expected, vec![ResultType::Failure]);
        assert!(!known_bad.unexpected);
        assert_eq!(fixed.actual, ResultType::Pass);
        assert!(fixed.unexpected);
        assert_eq!(undeclared.expected, vec![ResultType::Pass]);
        assert!(!undeclared.unexpected);
    }

    #[test]
    fn dry_run_does_not_execute() {
        let loader = Arc::new(FakeLoader::new());
        loader.add_failing("pkg.a", "would fail");
        let mut child = child(loader.clone(), None);
        child.dry_run = true;

        let mut worker = Worker::new(child, 1);
        worker.set_up();
        let result = worker.run_one(&TestInput::new("pkg.a"));
        assert_eq!(result.actual, ResultType::Pass);
        assert_eq!(loader.runs("pkg.a"), 0);
    }
}
