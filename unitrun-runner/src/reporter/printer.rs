// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::host::{Host, OutputStream};
use std::sync::Arc;

/// Writes progress lines to standard output.
///
/// In overwrite mode each update replaces the previous line. Otherwise every update goes on a
/// line of its own.
#[derive(Debug)]
pub(crate) struct Printer {
    host: Arc<dyn Host>,
    should_overwrite: bool,
    cols: usize,
    // Width of the unterminated line at the cursor, if any.
    last_line: Option<usize>,
}

impl Printer {
    pub(crate) fn new(host: Arc<dyn Host>, should_overwrite: bool, cols: usize) -> Self {
        Self {
            host,
            should_overwrite,
            cols,
            last_line: None,
        }
    }

    pub(crate) fn set_overwrite(&mut self, should_overwrite: bool) {
        self.should_overwrite = should_overwrite;
    }

    /// Prints `head` followed by `tail`.
    ///
    /// `head` is plain text and may be elided in the middle to fit the terminal. `tail` is never
    /// elided and may contain escape codes, so its visible width is passed in separately.
    pub(crate) fn update(&mut self, head: &str, tail: &str, tail_width: usize, elide: bool) {
        let head = if elide {
            elide_middle(head, (self.cols.saturating_sub(5)).saturating_sub(tail_width))
        } else {
            head.to_owned()
        };

        match self.last_line {
            Some(width) if self.should_overwrite => {
                self.print(&format!("\r{}\r", " ".repeat(width)));
            }
            Some(_) => self.print("\n"),
            None => {}
        }

        self.print(&head);
        self.print(tail);

        let msg_tail = if tail.is_empty() { head.as_str() } else { tail };
        self.last_line = match msg_tail.rfind('\n') {
            Some(_) if msg_tail.ends_with('\n') => None,
            Some(index) => Some(msg_tail[index + 1..].chars().count()),
            None if tail.is_empty() => Some(head.chars().count()),
            None => Some(head.chars().count() + tail_width),
        };
    }

    /// Ends the current line, if there is one.
    pub(crate) fn flush(&mut self) {
        if self.last_line.take().is_some() {
            self.print("\n");
        }
    }

    /// Prints a complete line, ending the current line first.
    pub(crate) fn println(&mut self, line: &str) {
        self.flush();
        self.print(line);
        self.print("\n");
    }

    fn print(&self, text: &str) {
        if !text.is_empty() {
            self.host.print(OutputStream::Stdout, text);
        }
    }
}

/// Shortens `msg` to about `max` characters by replacing its middle with `...`.
fn elide_middle(msg: &str, max: usize) -> String {
    let len = msg.chars().count();
    if max == 0 || len <= max {
        return msg.to_owned();
    }
    let keep = max / 2;
    let start: String = msg.chars().take(keep).collect();
    let end: String = msg.chars().skip(len - keep).collect();
    format!("{start}...{end}")
}
