//! Bounded command queue and the submission gateway in front of it.
//!
//! The gateway never waits for queue space: a full queue is reported back to
//! the caller as [`Rejection::QueueFull`] so overload is visible to whoever
//! issued the command.

use crate::cancel::CancelSignal;
use crate::error::{RelayError, RelayResult};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// A single line of text destined for the remote console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Wrap a command line. Embedded line breaks are rejected because the
    /// remote protocol frames messages by newline.
    pub fn new(text: impl Into<String>) -> RelayResult<Self> {
        let text = text.into();
        if text.contains(['\n', '\r']) {
            return Err(RelayError::InvalidCommand(
                "command must be a single line".to_string(),
            ));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    QueueFull,
    ShuttingDown,
}

/// Result of [`SubmissionGateway::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Create a queue with room for `capacity` commands.
///
/// Returns the cloneable submitting side and the single consuming side.
///
/// # Panics
///
/// Panics if `capacity` is zero (validated configuration never allows it).
pub fn command_queue(
    capacity: usize,
    signal: CancelSignal,
) -> (SubmissionGateway, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (SubmissionGateway { tx, signal }, CommandReceiver { rx })
}

/// Entry point for command sources. Cheap to clone; every clone feeds the
/// same queue.
#[derive(Debug, Clone)]
pub struct SubmissionGateway {
    tx: mpsc::Sender<Command>,
    signal: CancelSignal,
}

impl SubmissionGateway {
    /// Try to enqueue a command without waiting.
    pub fn submit(&self, command: Command) -> SubmitOutcome {
        if self.signal.is_cancelled() {
            debug!(command = %command, "rejecting command, relay shutting down");
            return SubmitOutcome::Rejected(Rejection::ShuttingDown);
        }

        match self.tx.try_send(command) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(command)) => {
                debug!(command = %command, "rejecting command, queue full");
                SubmitOutcome::Rejected(Rejection::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                debug!(command = %command, "rejecting command, queue closed");
                SubmitOutcome::Rejected(Rejection::ShuttingDown)
            }
        }
    }

    /// Number of commands currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consuming side of the queue, owned by the relay worker.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Wait for the next command. `None` once every gateway is dropped and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Close the queue to new submissions and drop everything still buffered.
    ///
    /// Returns the number of discarded commands.
    pub fn discard_pending(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while let Ok(command) = self.rx.try_recv() {
            debug!(command = %command, "discarding queued command");
            discarded += 1;
        }
        discarded
    }
}
