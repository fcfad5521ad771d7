//! Line-oriented connection to the remote econ console.
//!
//! The econ protocol is plain text over TCP: the server prompts with
//! `Enter password:`, the client answers with the password on one line, and
//! the server either grants access or reports a wrong password. After that
//! every newline-terminated line written is executed as a console command.
//! Server output is logged but never interpreted.

use crate::cancel::CancelSignal;
use crate::error::{RelayError, RelayResult};
use crate::resolver::TargetAddress;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PASSWORD_PROMPT: &str = "Enter password:";
const AUTH_GRANTED: &str = "Authentication successful";
const AUTH_WRONG_PASSWORD: &str = "Wrong password";

/// A connection that accepts one line of text at a time.
///
/// The relay worker is the only writer, so implementations need no internal
/// locking.
pub trait LineConnection: Send + 'static {
    /// Write `line` followed by a newline.
    ///
    /// Returns [`RelayError::Cancelled`] when the write was abandoned because
    /// the cancellation signal fired.
    fn write_line(&mut self, line: &str) -> impl Future<Output = RelayResult<()>> + Send;

    /// Release the connection. Calling it more than once is a no-op.
    fn close(&mut self) -> impl Future<Output = RelayResult<()>> + Send;
}

/// An authenticated econ session.
pub struct EconConnection {
    peer: SocketAddr,
    writer: Option<OwnedWriteHalf>,
    reader_task: Option<JoinHandle<()>>,
    signal: CancelSignal,
}

impl EconConnection {
    /// Connect to `target` and authenticate with `password`.
    ///
    /// The TCP connect and the password exchange together must finish within
    /// `handshake_timeout`. Cancellation aborts the attempt.
    pub async fn connect(
        target: &TargetAddress,
        password: &str,
        handshake_timeout: Duration,
        signal: CancelSignal,
    ) -> RelayResult<Self> {
        if password.is_empty() {
            return Err(RelayError::Config("econ password must not be empty".into()));
        }

        let peer = target.socket_addr();
        let attempt = async {
            let stream = TcpStream::connect(peer)
                .await
                .map_err(|e| RelayError::Connection(format!("cannot connect to {target}: {e}")))?;
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            authenticate(&mut lines, &mut write_half, password).await?;
            Ok::<_, RelayError>((lines, write_half))
        };

        let (lines, writer) = tokio::select! {
            _ = signal.cancelled() => return Err(RelayError::Cancelled),
            result = tokio::time::timeout(handshake_timeout, attempt) => {
                result.map_err(|_| RelayError::Timeout)??
            }
        };

        info!(peer = %peer, "econ authentication successful");

        let reader_task = tokio::spawn(log_remote_output(peer, lines));

        Ok(Self {
            peer,
            writer: Some(writer),
            reader_task: Some(reader_task),
            signal,
        })
    }
}

impl LineConnection for EconConnection {
    async fn write_line(&mut self, line: &str) -> RelayResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RelayError::Write("connection closed".into()))?;

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(RelayError::Cancelled),
            result = writer.write_all(&frame) => {
                result.map_err(|e| RelayError::Write(e.to_string()))
            }
        }
    }

    async fn close(&mut self) -> RelayResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "econ shutdown error ignored");
        }
        Ok(())
    }
}

impl Drop for EconConnection {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Run the password exchange on an already connected stream.
async fn authenticate<R, W>(lines: &mut Lines<R>, writer: &mut W, password: &str) -> RelayResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match lines.next_line().await? {
            Some(line) if line.contains(PASSWORD_PROMPT) => break,
            Some(line) => debug!(line = %line.trim_end(), "econ pre-auth output"),
            None => {
                return Err(RelayError::Connection(
                    "connection closed before password prompt".into(),
                ))
            }
        }
    }

    writer.write_all(password.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    loop {
        match lines.next_line().await? {
            Some(line) if line.contains(AUTH_GRANTED) => return Ok(()),
            Some(line) if line.contains(AUTH_WRONG_PASSWORD) => {
                return Err(RelayError::Auth(line.trim_end().to_string()))
            }
            Some(line) => debug!(line = %line.trim_end(), "econ auth output"),
            None => {
                return Err(RelayError::Auth(
                    "connection closed during authentication".into(),
                ))
            }
        }
    }
}

async fn log_remote_output(peer: SocketAddr, mut lines: Lines<BufReader<OwnedReadHalf>>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(peer = %peer, line = %line.trim_end(), "econ output"),
            Ok(None) => {
                info!(peer = %peer, "econ connection closed by remote");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "econ read error");
                break;
            }
        }
    }
}
