// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::printer::Printer;
use crate::{
    helpers::plural,
    host::Host,
    results::{ResultType, TestResult},
    stats::Stats,
    test_set::TestInput,
};
use owo_colors::{OwoColorize, Style};
use std::{fmt::Write, sync::Arc, time::SystemTime};

/// Options controlling what the reporter prints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Only print failures and the final summary if anything failed.
    pub quiet: bool,

    /// 0 by default; 1 puts every unit on its own line; 2 also shows output of passing units.
    pub verbose: u8,

    /// Print how long each unit took, and the whole run.
    pub timing: bool,

    /// Overwrite the progress line instead of appending lines.
    pub overwrite: bool,

    /// The width to elide progress lines to.
    pub terminal_width: usize,

    /// Use ANSI colors.
    pub colorize: bool,
}

/// Prints progress for a run.
#[derive(Debug)]
pub(crate) struct Reporter {
    host: Arc<dyn Host>,
    printer: Printer,
    opts: DisplayOptions,
    styles: Styles,
}

impl Reporter {
    pub(crate) fn new(host: Arc<dyn Host>, opts: DisplayOptions) -> Self {
        let printer = Printer::new(host.clone(), opts.overwrite, opts.terminal_width);
        let mut styles = Styles::default();
        if opts.colorize {
            styles.colorize();
        }
        Self {
            host,
            printer,
            opts,
            styles,
        }
    }

    pub(crate) fn test_started(&mut self, stats: &Stats, input: &TestInput) {
        if !self.opts.quiet && self.opts.overwrite {
            let head = format!("{}{}", stats.format(self.host.time()), input.name);
            self.printer.update(&head, "", 0, self.opts.verbose == 0);
        }
    }

    pub(crate) fn test_finished(&mut self, stats: &Stats, result: &TestResult) {
        let (word, style) = match result.actual {
            ResultType::Failure => (" failed", self.styles.fail),
            ResultType::Skip => (" was skipped", self.styles.skip),
            ResultType::Pass => (" passed", self.styles.pass),
        };
        let mut suffix = word.to_owned();
        if result.unexpected {
            suffix.push_str(" unexpectedly");
        }
        if self.opts.timing {
            // Writing to a String cannot fail.
            let _ = write!(suffix, " {:.4}s", result.took.as_secs_f64());
        }
        let has_output = !result.out.is_empty() || !result.err.is_empty();
        let head = format!("{}{}", stats.format(self.host.time()), result.name);

        if result.code != 0 {
            if has_output {
                suffix.push_str(":\n");
            }
            self.print_update(&head, &suffix, style, false);
            self.print_output(result);
        } else if !self.opts.quiet {
            if self.opts.verbose > 1 && has_output {
                suffix.push_str(":\n");
            }
            self.print_update(&head, &suffix, style, self.opts.verbose == 0);
            if self.opts.verbose > 1 {
                self.print_output(result);
            }
            if self.opts.verbose > 0 {
                self.printer.flush();
            }
        }
    }

    /// Announces a retry pass.
    ///
    /// The first retry switches to appending lines at verbosity at most 1.
    pub(crate) fn retrying(&mut self, attempt: usize, limit: usize) {
        if attempt == 1 {
            self.printer.flush();
            self.opts.overwrite = false;
            self.printer.set_overwrite(false);
            self.opts.verbose = self.opts.verbose.min(1);
        }
        self.printer.println("");
        let message = format!("Retrying failed tests (attempt #{attempt} of {limit})...");
        self.printer
            .println(&message.style(self.styles.retry).to_string());
        self.printer.println("");
    }

    pub(crate) fn summarize(&mut self, num_tests: usize, num_failures: usize, started: SystemTime) {
        if self.opts.quiet && num_failures == 0 {
            return;
        }
        let timing = if self.opts.timing {
            let elapsed = self
                .host
                .time()
                .duration_since(started)
                .unwrap_or_default();
            format!(" in {:.1}s", elapsed.as_secs_f64())
        } else {
            String::new()
        };
        let summary = format!(
            "{} {} run{timing}, {} {}.",
            num_tests.style(self.styles.count),
            plural::tests_str(num_tests),
            num_failures.style(if num_failures == 0 {
                self.styles.count
            } else {
                self.styles.fail
            }),
            plural::failures_str(num_failures),
        );
        self.printer.update("", &summary, 0, false);
        self.printer.flush();
    }

    /// Prints an arbitrary line.
    pub(crate) fn println(&mut self, line: &str) {
        self.printer.println(line);
    }

    pub(crate) fn flush(&mut self) {
        self.printer.flush();
    }

    fn print_update(&mut self, head: &str, suffix: &str, style: Style, elide: bool) {
        let width = suffix.trim_end_matches('\n').chars().count();
        // Only the status words are styled, not the trailing ":\n".
        let styled = match suffix.strip_suffix(":\n") {
            Some(words) => format!("{}:\n", words.style(style)),
            None => suffix.style(style).to_string(),
        };
        self.printer.update(head, &styled, width, elide);
    }

    fn print_output(&mut self, result: &TestResult) {
        for line in result.out.lines().chain(result.err.lines()) {
            self.printer.println(&format!("  {line}"));
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    retry: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.retry = Style::new().magenta().bold();
    }
}
