// Copyright (c) The unitrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals in unitrun.

use crate::errors::SignalHandlerSetupError;
use crossbeam_channel::Receiver;

/// The kind of signal handling to set up for a run.
///
/// A `SignalHandlerKind` can be passed into
/// [`Orchestrator::with_signal_handler`](crate::orchestrator::Orchestrator::with_signal_handler).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Captures Ctrl-C and termination signals.
    ///
    /// This may only be set up once per process.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// An event received from the signal handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SignalEvent {
    Interrupt,
}

/// The signal handler implementation.
///
/// Events are delivered over a channel so they can be selected on alongside worker responses.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    pub(crate) receiver: Receiver<SignalEvent>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and other signals.
    pub(crate) fn new() -> Result<Self, SignalHandlerSetupError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        ctrlc::set_handler(move || {
            // Failure to send means the run has finished.
            let _ = sender.send(SignalEvent::Interrupt);
        })?;
        Ok(Self { receiver })
    }

    /// Creates a new `SignalHandler` that never delivers an event.
    pub(crate) fn noop() -> Self {
        Self {
            receiver: crossbeam_channel::never(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> (crossbeam_channel::Sender<SignalEvent>, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (sender, Self { receiver })
    }
}
