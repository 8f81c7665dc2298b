// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use std::error::Error;
use thiserror::Error;
use tracing::error;
use unitrun_metadata::UnitrunExitCode;
use unitrun_runner::errors::{ConfigurationError, RunError};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed with display_to_stderr.

/// An error that ends the process with a message rather than a panic.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("configuration error")]
    Configuration {
        #[from]
        err: ConfigurationError,
    },
    #[error("run error")]
    Run {
        #[from]
        err: RunError,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => UnitrunExitCode::CONFIGURATION_ERROR,
            Self::Run { err } => err.process_exit_code(),
        }
    }

    /// Displays this error to stderr, followed by its chain of causes.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::Configuration { err } => {
                error!("{err}");
                err.source()
            }
            Self::Run {
                err: RunError::Discovery(err),
            } => {
                // The message already includes the loader error.
                error!("{err}");
                None
            }
            Self::Run { err } => {
                error!("{err}");
                err.source()
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
