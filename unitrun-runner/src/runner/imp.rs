// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    pool::WorkerPool,
    worker::{Child, WorkerMessage},
};
use crate::{
    errors::WorkerSpawnError,
    host::Host,
    loader::Loader,
    reporter::Reporter,
    results::{ResultSet, ResultTiming, TestResult},
    signal::{SignalEvent, SignalHandler},
    stats::Stats,
    test_set::{Instrumentation, TestInput, TestSet},
};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

/// Executes passes over a [`TestSet`].
///
/// The scheduler is the only thing that touches [`Stats`] and [`ResultSet`]: workers report
/// results over a channel and the scheduler records them as they arrive.
pub(crate) struct Scheduler<'a> {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) loader: Arc<dyn Loader>,
    pub(crate) instrumentation: Option<Arc<dyn Instrumentation>>,
    pub(crate) reporter: &'a mut Reporter,
    pub(crate) signal_handler: &'a SignalHandler,
    pub(crate) passthrough: bool,
    pub(crate) dry_run: bool,
    interrupted: bool,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(
        host: Arc<dyn Host>,
        loader: Arc<dyn Loader>,
        reporter: &'a mut Reporter,
        signal_handler: &'a SignalHandler,
    ) -> Self {
        Self {
            host,
            loader,
            instrumentation: None,
            reporter,
            signal_handler,
            passthrough: false,
            dry_run: false,
            interrupted: false,
        }
    }

    /// Returns true if an interrupt was received.
    pub(crate) fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Runs one pass over a set: the skip bucket, then the parallel bucket with up to `jobs`
    /// workers, then the isolated bucket with a single worker.
    pub(crate) fn run_one_set(
        &mut self,
        stats: &mut Stats,
        result_set: &mut ResultSet,
        test_set: &TestSet,
        jobs: usize,
    ) -> Result<(), WorkerSpawnError> {
        self.skip_tests(stats, result_set, &test_set.skip);
        self.run_list(stats, result_set, test_set, &test_set.parallel, jobs)?;
        self.run_list(stats, result_set, test_set, &test_set.isolated, 1)?;
        Ok(())
    }

    fn skip_tests(&mut self, stats: &mut Stats, result_set: &mut ResultSet, inputs: &[TestInput]) {
        for input in inputs {
            let last = self.host.time();
            stats.started += 1;
            self.reporter.test_started(stats, input);
            let now = self.host.time();
            let result = TestResult::skipped(
                input.name.clone(),
                ResultTiming {
                    started: last,
                    took: now.duration_since(last).unwrap_or_default(),
                    worker: 0,
                    pid: self.host.pid(),
                },
                input.message.clone().unwrap_or_default(),
            );
            stats.finished += 1;
            stats.add_time(now);
            self.reporter.test_finished(stats, &result);
            result_set.add(result);
        }
    }

    fn run_list(
        &mut self,
        stats: &mut Stats,
        result_set: &mut ResultSet,
        test_set: &TestSet,
        inputs: &[TestInput],
        jobs: usize,
    ) -> Result<(), WorkerSpawnError> {
        let jobs = jobs.min(inputs.len());
        if jobs == 0 || self.interrupted {
            return Ok(());
        }

        let child = Child {
            host: self.host.clone(),
            loader: self.loader.clone(),
            context: test_set.context.clone(),
            hooks: test_set.hooks.clone(),
            instrumentation: self.instrumentation.clone(),
            passthrough: self.passthrough,
            dry_run: self.dry_run,
        };
        let mut pool = WorkerPool::new(jobs, &child)?;
        let responses = pool.responses().clone();
        let signals = self.signal_handler.receiver.clone();
        let mut pending = inputs.iter();
        let mut running = BTreeSet::new();

        loop {
            while !self.interrupted && running.len() < jobs {
                let Some(input) = pending.next() else {
                    break;
                };
                stats.started += 1;
                self.reporter.test_started(stats, input);
                running.insert(input.name.clone());
                pool.send(input.clone());
            }
            if running.is_empty() {
                break;
            }

            crossbeam_channel::select! {
                recv(responses) -> message => match message {
                    Ok(WorkerMessage::Finished(result)) => {
                        running.remove(&result.name);
                        self.record(stats, result_set, result);
                    }
                    Ok(WorkerMessage::Exited(exit)) => {
                        debug!(worker_id = exit.worker_id, "worker exited");
                        pool.record_exit(exit);
                        if pool.live_workers() == 0 {
                            self.fail_running(stats, result_set, &mut running);
                        }
                    }
                    Err(_) => {
                        // Every worker is gone.
                        self.fail_running(stats, result_set, &mut running);
                    }
                },
                recv(signals) -> event => {
                    if let Ok(SignalEvent::Interrupt) = event {
                        if !self.interrupted {
                            warn!(
                                "interrupted: waiting for {} running units to finish",
                                running.len()
                            );
                        }
                        self.interrupted = true;
                    }
                },
            }
        }

        let shutdown = pool.join();
        for result in shutdown.late_results {
            self.record(stats, result_set, result);
        }
        Ok(())
    }

    fn record(&mut self, stats: &mut Stats, result_set: &mut ResultSet, result: TestResult) {
        stats.finished += 1;
        stats.add_time(self.host.time());
        self.reporter.test_finished(stats, &result);
        result_set.add(result);
    }

    /// Reports a failure for every unit still marked as running.
    fn fail_running(
        &mut self,
        stats: &mut Stats,
        result_set: &mut ResultSet,
        running: &mut BTreeSet<String>,
    ) {
        for name in std::mem::take(running) {
            let now = self.host.time();
            let result = TestResult::infrastructure_failure(
                name,
                ResultTiming {
                    started: now,
                    took: Default::default(),
                    worker: 0,
                    pid: self.host.pid(),
                },
                String::new(),
                "worker exited unexpectedly".to_owned(),
            );
            self.record(stats, result_set, result);
        }
    }
}
