//! Lifecycle of a running relay: spawn the worker, hand out gateways, and
//! shut everything down in order.
//!
//! Shutdown always runs cancel → join worker → close connection, so the
//! connection is never closed while a write may still be in flight.

use crate::cancel::CancelSignal;
use crate::connection::LineConnection;
use crate::error::{RelayError, RelayResult};
use crate::queue::{command_queue, SubmissionGateway};
use crate::worker::{RelayReport, RelayWorker};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A relay worker bound to one connection.
pub struct RelayPipeline<C> {
    gateway: SubmissionGateway,
    signal: CancelSignal,
    worker: JoinHandle<(C, RelayReport)>,
}

impl<C: LineConnection> RelayPipeline<C> {
    /// Take ownership of `conn` and start the worker on the current runtime.
    pub fn spawn(conn: C, capacity: usize, signal: CancelSignal) -> Self {
        let (gateway, queue) = command_queue(capacity, signal.clone());
        let worker = tokio::spawn(RelayWorker::new(conn, queue, signal.clone()).run());
        info!(capacity, "relay pipeline started");
        Self {
            gateway,
            signal,
            worker,
        }
    }

    /// A new submission handle for a command source.
    pub fn gateway(&self) -> SubmissionGateway {
        self.gateway.clone()
    }

    /// Cancel, wait for the worker to stop, then close the connection.
    pub async fn shutdown(self) -> RelayResult<RelayReport> {
        self.signal.cancel();
        drop(self.gateway);

        info!("waiting for command writer to finish");
        let (mut conn, report) = self.worker.await.map_err(|e| {
            error!(error = %e, "command writer task failed");
            RelayError::Other(format!("command writer task failed: {e}"))
        })?;
        info!("command writer finished");

        info!("closing econ connection...");
        conn.close().await?;
        info!("econ connection closed");
        Ok(report)
    }
}
