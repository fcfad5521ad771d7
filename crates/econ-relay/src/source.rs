//! Command source adapter.
//!
//! Models the chat platform's `exec` slash command: an [`Interaction`] arrives
//! from some channel, is checked against the configured [`ChatScope`], and its
//! `command` option is handed to the relay. The submission outcome is rendered
//! back as an ephemeral [`Reply`].
//!
//! [`ConsoleSource`] is the bundled transport: it turns each line read from a
//! reader (stdin in production) into an interaction scoped to the configured
//! channel and prints the reply.

use econ_relay_core::{
    CancelSignal, Command, RelayError, RelayResult, Rejection, SubmissionGateway, SubmitOutcome,
};
use std::fmt;
use std::num::NonZeroU64;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Name of the relay slash command.
pub const EXEC_COMMAND: &str = "exec";
/// Option carrying the console command text.
pub const COMMAND_OPTION: &str = "command";

/// Chat channel identifier (a non-zero 64-bit snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(NonZeroU64);

impl ChannelId {
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn parse(s: &str) -> RelayResult<Self> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| RelayError::Config(format!("invalid chat channel: {s:?}")))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Which origin may submit commands.
#[derive(Clone)]
pub struct ChatScope {
    channel: ChannelId,
    token: String,
}

impl ChatScope {
    pub fn new(channel: ChannelId, token: String) -> Self {
        Self { channel, token }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    fn admits(&self, interaction: &Interaction) -> bool {
        interaction.channel == self.channel && interaction.token == self.token
    }
}

/// A slash-command invocation delivered by the command source.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub channel: ChannelId,
    /// Token presented by the source that delivered the interaction.
    pub token: String,
    pub name: String,
    pub options: Vec<(String, String)>,
}

impl Interaction {
    /// An `exec` interaction carrying `command`.
    pub fn exec(scope: &ChatScope, command: impl Into<String>) -> Self {
        Self {
            channel: scope.channel,
            token: scope.token.clone(),
            name: EXEC_COMMAND.to_string(),
            options: vec![(COMMAND_OPTION.to_string(), command.into())],
        }
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Response shown to the user who issued the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Only visible to the invoking user.
    pub ephemeral: bool,
}

impl Reply {
    fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// Handles `exec` interactions by submitting to the relay.
pub struct ExecHandler {
    scope: ChatScope,
    gateway: SubmissionGateway,
}

impl ExecHandler {
    pub fn new(scope: ChatScope, gateway: SubmissionGateway) -> Self {
        Self { scope, gateway }
    }

    /// Returns `None` when the interaction is not ours to answer: another
    /// command name, another channel, or the wrong token.
    pub fn handle(&self, interaction: &Interaction) -> Option<Reply> {
        if interaction.name != EXEC_COMMAND {
            return None;
        }
        if !self.scope.admits(interaction) {
            debug!(channel = %interaction.channel, "ignoring command from unauthorized origin");
            return None;
        }

        let Some(text) = interaction.option(COMMAND_OPTION) else {
            return Some(Reply::ephemeral(format!(
                "execution failed: missing `{COMMAND_OPTION}` option"
            )));
        };
        let command = match Command::new(text) {
            Ok(command) => command,
            Err(e) => return Some(Reply::ephemeral(format!("execution failed: {e}"))),
        };

        let content = match self.gateway.submit(command) {
            SubmitOutcome::Accepted => format!("executed `{text}`"),
            SubmitOutcome::Rejected(Rejection::QueueFull) => {
                warn!(command = %text, queued = self.gateway.queued(), "command queue blocked");
                "execution failed, command queue blocked.".to_string()
            }
            SubmitOutcome::Rejected(Rejection::ShuttingDown) => {
                "did not execute command, application shutdown.".to_string()
            }
        };
        Some(Reply::ephemeral(content))
    }
}

/// Reads one command per line and prints each reply.
pub struct ConsoleSource<R, W> {
    reader: R,
    writer: W,
    scope: ChatScope,
}

impl<R, W> ConsoleSource<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, scope: ChatScope) -> Self {
        Self {
            reader,
            writer,
            scope,
        }
    }

    /// Feed lines to `handler` until cancellation.
    ///
    /// Reaching EOF only stops reading: the relay keeps serving until the
    /// signal fires, so a service started with stdin on `/dev/null` stays up.
    pub async fn run(self, handler: &ExecHandler, signal: &CancelSignal) -> RelayResult<()> {
        let Self {
            mut reader,
            mut writer,
            scope,
        } = self;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = signal.cancelled() => {
                    info!("command source stopped: shutdown");
                    return Ok(());
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                info!("command source closed, waiting for shutdown signal");
                signal.cancelled().await;
                return Ok(());
            }

            let reply = match std::str::from_utf8(&buf) {
                Ok(line) => {
                    let line = line.strip_suffix('\n').unwrap_or(line);
                    let line = line.strip_suffix('\r').unwrap_or(line);
                    if line.trim().is_empty() {
                        continue;
                    }
                    handler.handle(&Interaction::exec(&scope, line))
                }
                Err(e) => {
                    warn!(error = %e, "skipping console line that is not valid UTF-8");
                    Some(Reply::ephemeral("execution failed: command is not valid UTF-8"))
                }
            };

            if let Some(reply) = reply {
                debug!(ephemeral = reply.ephemeral, "replying to console");
                writer.write_all(reply.content.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
    }
}
