// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for unitrun-runner.

use std::time::{Duration, SystemTime};

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub(crate) fn failures_str(count: usize) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }
}

/// Returns the signed number of microseconds from `base` to `time`.
pub(crate) fn micros_between(base: SystemTime, time: SystemTime) -> i64 {
    match time.duration_since(base) {
        Ok(duration) => duration_micros(duration),
        Err(err) => -duration_micros(err.duration()),
    }
}

/// Returns the number of whole microseconds in a duration, saturating at `i64::MAX`.
pub(crate) fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Returns the number of whole seconds since the Unix epoch.
pub(crate) fn seconds_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
