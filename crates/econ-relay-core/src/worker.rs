//! The single consumer that drains the command queue onto the connection.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Running ──CommandWritten / WriteFailed──▶ Running
//! Running ──CancelObserved──▶ Draining ──DrainComplete──▶ Stopped
//! Running ──WriteCancelled / QueueClosed──▶ Stopped
//! ```
//!
//! Delivery is at-most-once: a failed write is logged and the command is
//! dropped. Commands still queued when cancellation arrives are discarded.

use crate::cancel::CancelSignal;
use crate::connection::LineConnection;
use crate::queue::{Command, CommandReceiver};
use tracing::{debug, info, warn};

/// Lifecycle of the relay worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Inputs that drive [`WorkerState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    CommandWritten,
    WriteFailed,
    WriteCancelled,
    CancelObserved,
    QueueClosed,
    DrainComplete,
}

impl WorkerState {
    /// Pure transition function.
    pub fn on(self, event: WorkerEvent) -> Self {
        use WorkerEvent::*;
        use WorkerState::*;
        match (self, event) {
            (Running, CommandWritten | WriteFailed) => Running,
            (Running, CancelObserved) => Draining,
            (Running, WriteCancelled | QueueClosed) => Stopped,
            (Running, DrainComplete) => Running,
            (Draining, DrainComplete | QueueClosed) => Stopped,
            (Draining, _) => Draining,
            (Stopped, _) => Stopped,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Stopped
    }
}

/// Counters returned when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Commands written to the connection.
    pub written: u64,
    /// Commands dropped after a failed write.
    pub failed: u64,
    /// Commands still queued at cancellation and never attempted.
    pub discarded: u64,
}

/// Drains a [`CommandReceiver`] into a [`LineConnection`].
pub struct RelayWorker<C> {
    conn: C,
    queue: CommandReceiver,
    signal: CancelSignal,
    state: WorkerState,
    report: RelayReport,
}

impl<C: LineConnection> RelayWorker<C> {
    pub fn new(conn: C, queue: CommandReceiver, signal: CancelSignal) -> Self {
        Self {
            conn,
            queue,
            signal,
            state: WorkerState::Running,
            report: RelayReport::default(),
        }
    }

    /// Run until `Stopped`, then hand the connection back so the owner can
    /// close it.
    pub async fn run(mut self) -> (C, RelayReport) {
        info!("command writer started");
        while !self.state.is_terminal() {
            let event = self.step().await;
            let next = self.state.on(event);
            if next != self.state {
                debug!(from = ?self.state, to = ?next, event = ?event, "command writer transition");
            }
            self.state = next;
        }
        info!(
            written = self.report.written,
            failed = self.report.failed,
            discarded = self.report.discarded,
            "command writer closed"
        );
        (self.conn, self.report)
    }

    async fn step(&mut self) -> WorkerEvent {
        match self.state {
            WorkerState::Running => {
                let next = tokio::select! {
                    biased;
                    _ = self.signal.cancelled() => None,
                    command = self.queue.recv() => Some(command),
                };
                match next {
                    None => {
                        info!("closing command writer: cancelled");
                        WorkerEvent::CancelObserved
                    }
                    Some(None) => {
                        info!("command queue closed");
                        WorkerEvent::QueueClosed
                    }
                    Some(Some(command)) => self.relay(command).await,
                }
            }
            WorkerState::Draining => {
                let discarded = self.queue.discard_pending();
                if discarded > 0 {
                    warn!(discarded, "discarded queued commands on shutdown");
                }
                self.report.discarded += discarded as u64;
                WorkerEvent::DrainComplete
            }
            WorkerState::Stopped => WorkerEvent::DrainComplete,
        }
    }

    async fn relay(&mut self, command: Command) -> WorkerEvent {
        match self.conn.write_line(command.as_str()).await {
            Ok(()) => {
                self.report.written += 1;
                info!(command = %command, "command relayed");
                WorkerEvent::CommandWritten
            }
            Err(e) if e.is_cancelled() => {
                self.report.discarded += 1;
                info!(command = %command, "closing command writer: write cancelled");
                WorkerEvent::WriteCancelled
            }
            Err(e) => {
                self.report.failed += 1;
                warn!(command = %command, error = %e, "failed to write line");
                WorkerEvent::WriteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, RelayResult};
    use crate::queue::command_queue;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// In-memory connection that records lines and fails on request.
    #[derive(Clone, Default)]
    struct Recorder {
        lines: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        cancel_on: Option<String>,
    }

    impl LineConnection for Recorder {
        async fn write_line(&mut self, line: &str) -> RelayResult<()> {
            if self.fail_on.as_deref() == Some(line) {
                return Err(RelayError::Write("broken pipe".into()));
            }
            if self.cancel_on.as_deref() == Some(line) {
                return Err(RelayError::Cancelled);
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        async fn close(&mut self) -> RelayResult<()> {
            Ok(())
        }
    }

    fn cmd(s: &str) -> Command {
        Command::new(s).unwrap()
    }

    #[test]
    fn transitions() {
        use WorkerEvent::*;
        use WorkerState::*;
        assert_eq!(Running.on(CommandWritten), Running);
        assert_eq!(Running.on(WriteFailed), Running);
        assert_eq!(Running.on(WriteCancelled), Stopped);
        assert_eq!(Running.on(QueueClosed), Stopped);
        assert_eq!(Running.on(CancelObserved), Draining);
        assert_eq!(Draining.on(CommandWritten), Draining);
        assert_eq!(Draining.on(DrainComplete), Stopped);
        assert_eq!(Stopped.on(CommandWritten), Stopped);
        assert!(Stopped.is_terminal());
        assert!(!Draining.is_terminal());
    }

    #[tokio::test]
    async fn writes_in_order_until_queue_closes() {
        let signal = CancelSignal::new();
        let (gateway, rx) = command_queue(16, signal.clone());
        let recorder = Recorder::default();
        for i in 0..10 {
            assert!(gateway.submit(cmd(&format!("say {i}"))).is_accepted());
        }
        drop(gateway);

        let (_conn, report) = RelayWorker::new(recorder.clone(), rx, signal).run().await;
        let expected: Vec<String> = (0..10).map(|i| format!("say {i}")).collect();
        assert_eq!(*recorder.lines.lock().unwrap(), expected);
        assert_eq!(report.written, 10);
    }

    #[tokio::test]
    async fn transient_failure_does_not_stop_worker() {
        let signal = CancelSignal::new();
        let (gateway, rx) = command_queue(16, signal.clone());
        let recorder = Recorder {
            fail_on: Some("kick 2".into()),
            ..Default::default()
        };
        gateway.submit(cmd("kick 1"));
        gateway.submit(cmd("kick 2"));
        gateway.submit(cmd("kick 3"));
        drop(gateway);

        let (_conn, report) = RelayWorker::new(recorder.clone(), rx, signal).run().await;
        assert_eq!(*recorder.lines.lock().unwrap(), vec!["kick 1", "kick 3"]);
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn cancellation_discards_queued_commands() {
        let signal = CancelSignal::new();
        let (gateway, rx) = command_queue(16, signal.clone());
        let recorder = Recorder::default();
        for i in 0..5 {
            gateway.submit(cmd(&format!("say {i}")));
        }
        signal.cancel();

        let (_conn, report) = tokio::time::timeout(
            Duration::from_secs(1),
            RelayWorker::new(recorder.clone(), rx, signal).run(),
        )
        .await
        .expect("worker should stop");
        assert!(recorder.lines.lock().unwrap().is_empty());
        assert_eq!(report.discarded, 5);
        assert!(!gateway.submit(cmd("late")).is_accepted());
    }

    #[tokio::test]
    async fn cancelled_write_stops_worker() {
        let signal = CancelSignal::new();
        let (gateway, rx) = command_queue(16, signal.clone());
        let recorder = Recorder {
            cancel_on: Some("b".into()),
            ..Default::default()
        };
        gateway.submit(cmd("a"));
        gateway.submit(cmd("b"));
        gateway.submit(cmd("c"));

        let (_conn, report) = tokio::time::timeout(
            Duration::from_secs(1),
            RelayWorker::new(recorder.clone(), rx, signal).run(),
        )
        .await
        .expect("worker should stop");
        assert_eq!(*recorder.lines.lock().unwrap(), vec!["a"]);
        assert_eq!(report.written, 1);
    }

    #[tokio::test]
    async fn idle_worker_wakes_on_cancel() {
        let signal = CancelSignal::new();
        let (_gateway, rx) = command_queue(4, signal.clone());
        let worker = tokio::spawn(RelayWorker::new(Recorder::default(), rx, signal.clone()).run());
        tokio::task::yield_now().await;
        signal.cancel();
        let (_conn, report) = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop")
            .unwrap();
        assert_eq!(report, RelayReport::default());
    }
}
