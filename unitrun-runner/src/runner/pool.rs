// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixed-size pool of worker threads.
//!
//! Workers share nothing mutable with the thread that owns the pool. Units go in over one
//! channel and results come back over another.

use super::worker::{Child, Worker, WorkerExit, WorkerMessage};
use crate::{errors::WorkerSpawnError, results::TestResult, test_set::TestInput};
use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;
use tracing::{debug, warn};

pub(crate) struct WorkerPool {
    requests: Option<Sender<TestInput>>,
    responses: Receiver<WorkerMessage>,
    handles: Vec<(usize, JoinHandle<()>)>,
    exits: Vec<WorkerExit>,
}

/// What was left over once a pool shut down.
#[derive(Debug, Default)]
pub(crate) struct PoolShutdown {
    /// Results that arrived after the scheduler stopped listening.
    pub(crate) late_results: Vec<TestResult>,

    /// How each worker exited, in the order they exited.
    pub(crate) exits: Vec<WorkerExit>,
}

impl WorkerPool {
    /// Starts `jobs` workers, numbered from 1.
    pub(crate) fn new(jobs: usize, child: &Child) -> Result<Self, WorkerSpawnError> {
        let (request_sender, request_receiver) = crossbeam_channel::unbounded();
        let (response_sender, response_receiver) = crossbeam_channel::unbounded();

        let mut handles = Vec::with_capacity(jobs);
        for worker_id in 1..=jobs {
            let worker = Worker::new(child.clone(), worker_id);
            let requests = request_receiver.clone();
            let responses = response_sender.clone();
            let handle = std::thread::Builder::new()
                .name(format!("unitrun-worker-{worker_id}"))
                .spawn(move || worker.run(requests, responses))
                .map_err(|err| WorkerSpawnError::new(worker_id, err))?;
            handles.push((worker_id, handle));
        }
        debug!(jobs, "started worker pool");

        Ok(Self {
            requests: Some(request_sender),
            responses: response_receiver,
            handles,
            exits: Vec::new(),
        })
    }

    /// Hands a unit to the next free worker.
    pub(crate) fn send(&self, input: TestInput) {
        if let Some(requests) = &self.requests {
            // Failure to send means every worker has exited; the scheduler notices that through
            // the response channel.
            let _ = requests.send(input);
        }
    }

    /// The channel results arrive on.
    pub(crate) fn responses(&self) -> &Receiver<WorkerMessage> {
        &self.responses
    }

    /// Records a worker exit observed by the scheduler.
    pub(crate) fn record_exit(&mut self, exit: WorkerExit) {
        self.exits.push(exit);
    }

    /// Returns the number of workers that have not reported an exit.
    pub(crate) fn live_workers(&self) -> usize {
        self.handles.len() - self.exits.len()
    }

    /// Stops accepting units, waits for every worker to tear down and joins their threads.
    pub(crate) fn join(mut self) -> PoolShutdown {
        // Dropping the request sender ends each worker's loop once the queue is drained.
        self.requests = None;

        let mut shutdown = PoolShutdown {
            exits: std::mem::take(&mut self.exits),
            ..PoolShutdown::default()
        };
        // Iteration ends once every worker has dropped its response sender.
        for message in self.responses.iter() {
            match message {
                WorkerMessage::Finished(result) => shutdown.late_results.push(result),
                WorkerMessage::Exited(exit) => shutdown.exits.push(exit),
            }
        }

        for (worker_id, handle) in self.handles {
            if handle.join().is_err() {
                warn!("worker {worker_id} panicked");
            }
        }
        for exit in &shutdown.exits {
            if let Some(err) = &exit.teardown_error {
                warn!("teardown for worker {} failed: {err}", exit.worker_id);
            }
        }
        debug!(workers = shutdown.exits.len(), "worker pool shut down");
        shutdown
    }
}
