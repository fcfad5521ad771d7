//! Relay configuration: TOML file + CLI overrides.
//!
//! Everything is validated up front by [`RelayConfig::validate`]; the relay
//! only starts from a [`ValidConfig`].

use crate::source::{ChannelId, ChatScope};
use econ_relay_core::{resolve_target, RelayError, RelayResult, TargetAddress};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub econ: EconSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[econ]` section: the remote console.
#[derive(Debug, Clone, Deserialize)]
pub struct EconSection {
    /// `host:port`
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for EconSection {
    fn default() -> Self {
        Self {
            address: String::new(),
            password: String::new(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

/// `[chat]` section: the command source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatSection {
    /// Token the command source must present.
    #[serde(default)]
    pub token: String,
    /// Channel id that is allowed to submit commands.
    #[serde(default)]
    pub channel: String,
}

/// `[relay]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    econ_relay_core::DEFAULT_QUEUE_CAPACITY
}

/// Values supplied on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub econ_address: Option<String>,
    pub econ_password: Option<String>,
    pub handshake_timeout_secs: Option<u64>,
    pub chat_token: Option<String>,
    pub chat_channel: Option<String>,
    pub queue_capacity: Option<usize>,
}

/// Merged, not yet validated configuration.
#[derive(Clone)]
pub struct RelayConfig {
    pub econ_address: String,
    pub econ_password: String,
    pub handshake_timeout: Duration,
    pub chat_token: String,
    pub chat_channel: String,
    pub queue_capacity: usize,
}

/// Configuration that passed validation, with the target already resolved.
#[derive(Clone)]
pub struct ValidConfig {
    pub target: TargetAddress,
    pub econ_password: String,
    pub handshake_timeout: Duration,
    pub scope: ChatScope,
    pub queue_capacity: usize,
}

impl RelayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self {
            econ_address: overrides.econ_address.unwrap_or(file_config.econ.address),
            econ_password: overrides.econ_password.unwrap_or(file_config.econ.password),
            handshake_timeout: Duration::from_secs(
                overrides
                    .handshake_timeout_secs
                    .unwrap_or(file_config.econ.handshake_timeout_secs),
            ),
            chat_token: overrides.chat_token.unwrap_or(file_config.chat.token),
            chat_channel: overrides.chat_channel.unwrap_or(file_config.chat.channel),
            queue_capacity: overrides
                .queue_capacity
                .unwrap_or(file_config.relay.queue_capacity),
        })
    }

    /// Check every field and resolve the econ address.
    ///
    /// Cheap checks run first so a malformed config never hits DNS.
    pub async fn validate(self) -> RelayResult<ValidConfig> {
        if self.chat_token.is_empty() {
            return Err(RelayError::Config("chat token must not be empty".into()));
        }
        if self.econ_password.is_empty() {
            return Err(RelayError::Config("econ password must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(RelayError::Config("queue capacity must be at least 1".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(RelayError::Config("handshake timeout must be at least 1 second".into()));
        }
        let channel = ChannelId::parse(&self.chat_channel)?;
        let target = resolve_target(&self.econ_address).await?;

        Ok(ValidConfig {
            target,
            econ_password: self.econ_password,
            handshake_timeout: self.handshake_timeout,
            scope: ChatScope::new(channel, self.chat_token),
            queue_capacity: self.queue_capacity,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
