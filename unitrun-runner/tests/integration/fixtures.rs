// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use color_eyre::eyre::Result;
use serde_json::Value;
use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};
use unitrun_runner::{
    config::{RunConfig, RunOptions},
    errors::{HookError, RunError},
    fakes::{FakeHost, FakeLoader},
    orchestrator::{Orchestrator, RunOutput},
    results::{ResultSet, ResultType},
    test_set::{WorkerHooks, WorkerInfo},
};

/// A fake project: an in-memory host and loader.
pub(crate) struct Project {
    pub(crate) host: Arc<FakeHost>,
    pub(crate) loader: Arc<FakeLoader>,
}

impl Project {
    pub(crate) fn new() -> Self {
        Self {
            host: Arc::new(FakeHost::new()),
            loader: Arc::new(FakeLoader::new()),
        }
    }

    pub(crate) fn orchestrator(&self, opts: RunOptions) -> Result<Orchestrator> {
        let config = RunConfig::resolve(opts, &*self.host)?;
        Ok(Orchestrator::new(
            self.host.clone(),
            self.loader.clone(),
            config,
        ))
    }

    /// Resolves the options and runs. Configuration errors fail the test; run errors are
    /// returned.
    pub(crate) fn run(&self, opts: RunOptions) -> Result<Result<RunOutput, RunError>> {
        Ok(self.orchestrator(opts)?.run())
    }
}

pub(crate) fn outcomes(result_set: &ResultSet) -> Vec<(&str, ResultType)> {
    result_set
        .results()
        .iter()
        .map(|result| (result.name.as_str(), result.actual))
        .collect()
}

pub(crate) fn interval(result_set: &ResultSet, name: &str) -> (SystemTime, SystemTime) {
    let result = result_set
        .results_for(name)
        .next()
        .unwrap_or_else(|| panic!("no result for {name}"));
    (result.started, result.started + result.took)
}

/// Worker hooks that record every call.
#[derive(Default)]
pub(crate) struct RecordingHooks {
    pub(crate) setups: Mutex<Vec<usize>>,
    pub(crate) teardowns: Mutex<Vec<usize>>,
}

impl WorkerHooks for RecordingHooks {
    fn setup(&self, worker: &WorkerInfo, context: &Value) -> Result<Value, HookError> {
        self.setups.lock().unwrap().push(worker.worker_id);
        let mut context = context.clone();
        context["worker"] = worker.worker_id.into();
        Ok(context)
    }

    fn teardown(&self, worker: &WorkerInfo, _context: &Value) -> Result<(), HookError> {
        self.teardowns.lock().unwrap().push(worker.worker_id);
        Ok(())
    }
}
