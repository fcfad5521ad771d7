//! econ-relay-core: the command relay pipeline.
//!
//! Accepts short text commands from any number of submitters, buffers them in
//! a bounded queue, and writes them one line at a time onto a single econ
//! (external console) connection. Overload and shutdown are reported to the
//! submitter synchronously; delivery itself is at-most-once.
//!
//! ```text
//! SubmissionGateway::submit ─try_send─▶ CommandQueue ─recv─▶ RelayWorker ─write_line─▶ LineConnection
//!                     ▲                                          ▲
//!                     └────────────── CancelSignal ──────────────┘
//! ```

pub mod cancel;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod worker;

pub use cancel::CancelSignal;
pub use connection::{EconConnection, LineConnection};
pub use error::{RelayError, RelayResult};
pub use pipeline::RelayPipeline;
pub use queue::{
    command_queue, Command, CommandReceiver, Rejection, SubmissionGateway, SubmitOutcome,
};
pub use resolver::{resolve_target, select_preferred, TargetAddress};
pub use worker::{RelayReport, RelayWorker, WorkerEvent, WorkerState};

/// Default number of commands the queue buffers before rejecting submissions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
