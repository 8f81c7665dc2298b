// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::imp::Scheduler;
use crate::{errors::WorkerSpawnError, results::ResultSet, stats::Stats, test_set::TestSet};
use std::time::Duration;
use tracing::debug;

/// Where the retry controller is in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryState {
    /// The initial pass has completed and no retry has started.
    Initial,

    /// Retry attempt `k` (starting at 1) is running.
    Retrying(usize),

    /// No further retries will run.
    Done,
}

/// Re-runs failed units, one at a time, until they pass or the retry limit is reached.
#[derive(Debug)]
pub(crate) struct RetryController {
    limit: usize,
    status_format: String,
    timeout: Option<Duration>,
    state: RetryState,
}

impl RetryController {
    pub(crate) fn new(limit: usize, status_format: String, timeout: Option<Duration>) -> Self {
        Self {
            limit,
            status_format,
            timeout,
            state: RetryState::Initial,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RetryState {
        self.state
    }

    /// Runs retry passes over the failed names of `result_set`, appending every retry result to
    /// it.
    ///
    /// Each pass runs exactly the names that failed in the previous pass.
    pub(crate) fn run(
        &mut self,
        scheduler: &mut Scheduler<'_>,
        initial: &TestSet,
        result_set: &mut ResultSet,
    ) -> Result<(), WorkerSpawnError> {
        let mut failed = result_set.failed_test_names();
        let mut remaining = self.limit;

        while !failed.is_empty() && remaining > 0 && !scheduler.interrupted() {
            let attempt = self.limit - remaining + 1;
            self.state = RetryState::Retrying(attempt);
            debug!(attempt, units = failed.len(), "starting retry pass");
            scheduler.reporter.retrying(attempt, self.limit);

            let retry_set = initial.for_retry(&failed, self.timeout);
            let host_time = scheduler.host.time();
            let mut stats = Stats::new(self.status_format.clone(), host_time, 1);
            stats.total = failed.len();

            let mut retry_results = ResultSet::new();
            scheduler.run_one_set(&mut stats, &mut retry_results, &retry_set, 1)?;
            failed = retry_results.failed_test_names();
            result_set.extend(retry_results);
            remaining -= 1;
        }
        if remaining != self.limit {
            scheduler.reporter.println("");
        }

        self.state = RetryState::Done;
        Ok(())
    }
}
