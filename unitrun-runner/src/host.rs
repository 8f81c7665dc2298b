// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access to the outside world.
//!
//! Everything the engine needs from the operating system goes through the [`Host`] trait, so that
//! runs can be driven entirely in memory in tests (see [`FakeHost`](crate::fakes::FakeHost)).

use crate::errors::FetchError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
    time::SystemTime,
};

/// The terminal width used when the real width cannot be determined.
pub const DEFAULT_TERMINAL_WIDTH: usize = 80;

/// An output stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

/// A POST request sent through [`Host::fetch`].
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// The URL to send the request to.
    pub url: String,

    /// Request headers.
    pub headers: Vec<(String, String)>,

    /// The request body.
    pub body: Vec<u8>,
}

/// The response to a [`FetchRequest`].
#[derive(Clone, Debug)]
pub struct FetchResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body.
    pub body: String,
}

/// The capabilities the engine consumes from its environment.
///
/// A host is shared between the orchestrator and every worker, so implementations must be
/// thread-safe.
pub trait Host: fmt::Debug + Send + Sync {
    /// Returns the current wall-clock time.
    fn time(&self) -> SystemTime;

    /// Returns the current process ID.
    fn pid(&self) -> u32;

    /// Returns the current working directory.
    fn cwd(&self) -> io::Result<Utf8PathBuf>;

    /// Returns true if something exists at this path.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Returns true if this path is a regular file.
    fn is_file(&self, path: &Utf8Path) -> bool;

    /// Returns true if this path is a directory.
    fn is_dir(&self, path: &Utf8Path) -> bool;

    /// Lists all files below this directory, recursively, in sorted order.
    fn files_under(&self, dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>>;

    /// Reads a UTF-8 text file.
    fn read_text_file(&self, path: &Utf8Path) -> io::Result<String>;

    /// Writes a UTF-8 text file, replacing any existing contents.
    fn write_text_file(&self, path: &Utf8Path, contents: &str) -> io::Result<()>;

    /// Reads all of standard input.
    fn read_stdin(&self) -> io::Result<String>;

    /// Looks up an environment variable.
    fn getenv(&self, key: &str) -> Option<String>;

    /// Returns the number of available CPUs.
    fn cpu_count(&self) -> usize;

    /// Returns the width of the terminal attached to standard output.
    fn terminal_width(&self) -> usize;

    /// Returns true if standard output is a terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Writes text to an output stream, without adding a newline.
    fn print(&self, stream: OutputStream, text: &str);

    /// Sends a POST request.
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// The output of a single unit execution.
///
/// Created before a unit is resolved and restored with [`restore`](Self::restore) once it
/// finishes.
#[derive(Debug)]
pub struct OutputCapture {
    target: CaptureTarget,
    out: String,
    err: String,
}

#[derive(Debug)]
enum CaptureTarget {
    Divert,
    Passthrough(Arc<dyn Host>),
}

impl OutputCapture {
    /// Begins capturing the output of a single unit.
    ///
    /// If `divert` is false, the returned capture forwards everything written to it straight to
    /// the host.
    pub fn begin(host: &Arc<dyn Host>, divert: bool) -> Self {
        if divert {
            Self::diverted()
        } else {
            Self::passthrough(host.clone())
        }
    }

    /// Creates a capture that buffers everything written to it.
    pub fn diverted() -> Self {
        Self {
            target: CaptureTarget::Divert,
            out: String::new(),
            err: String::new(),
        }
    }

    /// Creates a capture that writes everything straight through to the host.
    pub fn passthrough(host: Arc<dyn Host>) -> Self {
        Self {
            target: CaptureTarget::Passthrough(host),
            out: String::new(),
            err: String::new(),
        }
    }

    /// Returns true if output is being diverted into buffers.
    pub fn is_diverted(&self) -> bool {
        matches!(self.target, CaptureTarget::Divert)
    }

    /// Writes text to the given stream.
    pub fn write(&mut self, stream: OutputStream, text: &str) {
        match (&self.target, stream) {
            (CaptureTarget::Divert, OutputStream::Stdout) => self.out.push_str(text),
            (CaptureTarget::Divert, OutputStream::Stderr) => self.err.push_str(text),
            (CaptureTarget::Passthrough(host), stream) => host.print(stream, text),
        }
    }

    /// Stops capturing and returns the captured standard output and standard error.
    ///
    /// In passthrough mode both are empty.
    pub fn restore(self) -> (String, String) {
        (self.out, self.err)
    }
}

/// A [`Host`] backed by the real operating system.
#[derive(Clone, Debug, Default)]
pub struct RealHost {
    _private: (),
}

impl RealHost {
    /// Creates a new `RealHost`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Host for RealHost {
    fn time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn cwd(&self) -> io::Result<Utf8PathBuf> {
        let cwd = std::env::current_dir()?;
        Utf8PathBuf::try_from(cwd).map_err(|err| err.into_io_error())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Utf8Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        path.is_dir()
    }

    fn files_under(&self, dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in dir.read_dir_utf8()? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    pending.push(entry.into_path());
                } else {
                    files.push(entry.into_path());
                }
            }
        }
        files.sort_unstable();
        Ok(files)
    }

    fn read_text_file(&self, path: &Utf8Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_text_file(&self, path: &Utf8Path, contents: &str) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn read_stdin(&self) -> io::Result<String> {
        let mut input = String::new();
        io::stdin().lock().read_to_string(&mut input)?;
        Ok(input)
    }

    fn getenv(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn cpu_count(&self) -> usize {
        match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                tracing::warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        }
    }

    fn terminal_width(&self) -> usize {
        console::Term::stdout()
            .size_checked()
            .map_or(DEFAULT_TERMINAL_WIDTH, |(_, width)| usize::from(width))
    }

    fn stdout_is_terminal(&self) -> bool {
        console::Term::stdout().is_term()
    }

    fn print(&self, stream: OutputStream, text: &str) {
        // Write errors (e.g. a closed pipe) are not fatal to a run.
        let _ = match stream {
            OutputStream::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|()| stdout.flush())
            }
            OutputStream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
        };
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let mut builder = agent.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let mut response = builder
            .send(&request.body[..])
            .map_err(|err| FetchError::new(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| FetchError::new(err.to_string()))?;
        Ok(FetchResponse { status, body })
    }
}
