// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress counters and the status-line template.

use std::{collections::VecDeque, fmt::Write, time::SystemTime};

/// Run progress: how many units there are, how many have started and how many have finished.
///
/// `Stats` is only ever mutated by the thread draining worker responses.
#[derive(Clone, Debug)]
pub struct Stats {
    fmt: String,
    started_time: SystemTime,
    window: usize,
    finished_times: VecDeque<SystemTime>,

    /// The number of units in this pass.
    pub total: usize,

    /// The number of units that have been started.
    pub started: usize,

    /// The number of units that have finished.
    pub finished: usize,
}

impl Stats {
    /// Creates a new `Stats` with the given status template.
    ///
    /// `window` is the number of recent completions used to compute the current rate, typically
    /// the number of jobs.
    pub fn new(fmt: impl Into<String>, started_time: SystemTime, window: usize) -> Self {
        Self {
            fmt: fmt.into(),
            started_time,
            window: window.max(1),
            finished_times: VecDeque::new(),
            total: 0,
            started: 0,
            finished: 0,
        }
    }

    /// Returns the time this pass started.
    pub fn started_time(&self) -> SystemTime {
        self.started_time
    }

    /// Records a completion at the given time for the purposes of the current rate.
    pub fn add_time(&mut self, now: SystemTime) {
        self.finished_times.push_back(now);
        while self.finished_times.len() > self.window {
            self.finished_times.pop_front();
        }
    }

    /// Expands the status template.
    ///
    /// | Sequence | Expansion                                   |
    /// |----------|---------------------------------------------|
    /// | `%s`     | units started                               |
    /// | `%t`     | units in total                              |
    /// | `%f`     | units finished                              |
    /// | `%u`     | units not yet started                       |
    /// | `%r`     | units running                               |
    /// | `%p`     | percentage of units started                 |
    /// | `%o`     | overall rate, in units finished per second  |
    /// | `%c`     | rate over the most recent completions       |
    /// | `%e`     | seconds elapsed                             |
    /// | `%%`     | a literal `%`                               |
    ///
    /// Anything else is copied through unchanged.
    pub fn format(&self, now: SystemTime) -> String {
        let mut out = String::with_capacity(self.fmt.len());
        let mut chars = self.fmt.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let Some(next) = chars.next() else {
                out.push('%');
                break;
            };
            // Writing to a String cannot fail.
            let _ = match next {
                's' => write!(out, "{}", self.started),
                't' => write!(out, "{}", self.total),
                'f' => write!(out, "{}", self.finished),
                'u' => write!(out, "{}", self.total.saturating_sub(self.started)),
                'r' => write!(out, "{}", self.started.saturating_sub(self.finished)),
                'p' => write!(out, "{:5.1}%", self.percent_started()),
                'o' => self.write_rate(&mut out, self.overall_rate(now)),
                'c' => self.write_rate(&mut out, self.current_rate()),
                'e' => write!(out, "{:.3}", self.elapsed(now)),
                '%' => write!(out, "%"),
                other => write!(out, "%{other}"),
            };
        }
        out
    }

    fn elapsed(&self, now: SystemTime) -> f64 {
        now.duration_since(self.started_time)
            .unwrap_or_default()
            .as_secs_f64()
    }

    fn percent_started(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.started as f64 / self.total as f64
        }
    }

    fn overall_rate(&self, now: SystemTime) -> Option<f64> {
        let elapsed = self.elapsed(now);
        (elapsed > 0.0).then(|| self.finished as f64 / elapsed)
    }

    fn current_rate(&self) -> Option<f64> {
        let (first, last) = (self.finished_times.front()?, self.finished_times.back()?);
        let span = last.duration_since(*first).ok()?.as_secs_f64();
        (span > 0.0).then(|| (self.finished_times.len() - 1) as f64 / span)
    }

    fn write_rate(&self, out: &mut String, rate: Option<f64>) -> std::fmt::Result {
        match rate {
            Some(rate) => write!(out, "{rate:.1}"),
            None => out.write_str("-"),
        }
    }
}
