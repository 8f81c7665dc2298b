// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by unitrun.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;
use unitrun_metadata::{NameConflictError, UnitrunExitCode};

/// An error detected while resolving the run configuration.
///
/// Configuration errors are always detected before a run starts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// A `--metadata` entry was not of the form `key=value`.
    #[error("malformed --metadata \"{entry}\" (expected key=value)")]
    MalformedMetadata {
        /// The entry as passed in.
        entry: String,
    },

    /// Uploading was requested, but a companion field was missing.
    #[error("{field} must be specified along with --upload-to")]
    MissingUploadField {
        /// The name of the missing option.
        field: &'static str,
    },

    /// The number of jobs was zero.
    #[error("the number of jobs must be at least 1")]
    InvalidJobs,

    /// A skip or isolate glob could not be compiled.
    #[error("invalid glob `{glob}`")]
    InvalidGlob {
        /// The glob string.
        glob: String,

        /// The underlying error.
        #[source]
        err: GlobConstructError,
    },

    /// The run context was not valid JSON.
    #[error("--context is not valid JSON")]
    InvalidContext {
        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The current directory could not be determined.
    #[error("unable to determine the current directory")]
    CurrentDir {
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file `{path}`")]
    ConfigFileRead {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config file `{path}`")]
    ConfigFileParse {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: Box<serde_path_to_error::Error<ConfigError>>,
    },

    /// The configuration could not be assembled from its sources.
    #[error("failed to assemble configuration")]
    ConfigBuild {
        /// The underlying error.
        #[source]
        err: Box<ConfigError>,
    },
}

/// An error that occurred while constructing a glob.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum GlobConstructError {
    /// The glob was invalid.
    #[error("{}", .0.kind())]
    InvalidGlob(globset::Error),

    /// The glob could not be converted to a regex.
    #[error("{0}")]
    RegexError(String),
}

/// An error returned by a [`Loader`](crate::loader::Loader).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// Nothing with the given name could be found.
    #[error("no unit or group named `{name}`")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// An I/O error occurred while loading.
    #[error("error reading `{path}`")]
    Io {
        /// The path being read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// A glob pattern passed to the loader was invalid.
    #[error("invalid pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        err: GlobConstructError,
    },

    /// A loader-specific failure.
    #[error("{message}")]
    Custom {
        /// A description of the failure.
        message: String,
    },
}

impl LoadError {
    /// Creates a new loader-specific error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

/// A named unit or module could not be discovered.
///
/// Discovery errors abort the run before anything executes.
#[derive(Debug, Error)]
#[error("Failed to load \"{name}\": {err}")]
pub struct DiscoveryError {
    name: String,
    #[source]
    err: LoadError,
}

impl DiscoveryError {
    pub(crate) fn new(name: impl Into<String>, err: LoadError) -> Self {
        Self {
            name: name.into(),
            err,
        }
    }

    /// Returns the name that failed to load.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying loader error.
    pub fn load_error(&self) -> &LoadError {
        &self.err
    }
}

/// A per-worker setup or teardown hook failed.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Creates a new hook error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error returned by [`Host::fetch`](crate::host::Host::fetch).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    /// Creates a new fetch error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error that occurred while uploading the full results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// The request could not be sent.
    #[error("uploading the JSON results to {url} raised \"{err}\"")]
    Transport {
        /// The upload URL.
        url: String,

        /// The underlying error.
        #[source]
        err: FetchError,
    },

    /// The server responded with a non-200 status.
    #[error("uploading the JSON results to {url} failed with {status}: \"{body}\"")]
    Status {
        /// The upload URL.
        url: String,

        /// The HTTP status code.
        status: u16,

        /// The response body.
        body: String,
    },
}

/// An error that occurred while setting up the Ctrl-C handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] ctrlc::Error);

/// A worker thread could not be spawned.
#[derive(Debug, Error)]
#[error("failed to spawn worker {worker_id}")]
pub struct WorkerSpawnError {
    worker_id: usize,
    #[source]
    err: io::Error,
}

impl WorkerSpawnError {
    pub(crate) fn new(worker_id: usize, err: io::Error) -> Self {
        Self { worker_id, err }
    }
}

/// The kind of artifact being written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// The full-results document.
    FullResults,

    /// The trace document.
    Trace,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullResults => f.write_str("full results"),
            Self::Trace => f.write_str("trace"),
        }
    }
}

/// An error that occurred while writing an artifact to disk.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteArtifactError {
    /// Serializing the artifact failed.
    #[error("failed to serialize {kind}")]
    Serialize {
        /// The kind of artifact.
        kind: ArtifactKind,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// Writing the artifact failed.
    #[error("failed to write {kind} to `{path}`")]
    Write {
        /// The kind of artifact.
        kind: ArtifactKind,

        /// The destination.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

/// An error that reading the list of unit names failed.
#[derive(Debug, Error)]
#[error("failed to read unit names from `{path}`")]
pub struct ReadFileListError {
    path: String,
    #[source]
    err: io::Error,
}

impl ReadFileListError {
    pub(crate) fn new(path: impl Into<String>, err: io::Error) -> Self {
        Self {
            path: path.into(),
            err,
        }
    }
}

/// A fatal error that ended a run early.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// Discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The file list could not be read.
    #[error(transparent)]
    ReadFileList(#[from] ReadFileListError),

    /// Two discovered unit names can't both be recorded because one is a prefix of the other.
    #[error(transparent)]
    NameConflict(#[from] NameConflictError),

    /// No units remained in the parallel and isolated buckets.
    #[error("No tests to run.")]
    NoTestsToRun,

    /// The signal handler could not be installed.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),

    /// A worker could not be spawned.
    #[error(transparent)]
    WorkerSpawn(#[from] WorkerSpawnError),

    /// Writing an artifact failed.
    #[error(transparent)]
    WriteArtifact(#[from] WriteArtifactError),
}

impl RunError {
    /// Returns the process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Discovery(_)
            | Self::ReadFileList(_)
            | Self::NameConflict(_)
            | Self::NoTestsToRun
            | Self::SignalHandlerSetup(_)
            | Self::WorkerSpawn(_)
            | Self::WriteArtifact(_) => UnitrunExitCode::FAILURE,
        }
    }
}
