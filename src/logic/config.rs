//! Server configuration
//!
//! Defaults and environment lookups live in `constants.rs`; the CLI
//! overrides individual fields, then `validate()` is run once. The result
//! is never mutated afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{self, DST_IP_VOCAB_FILE, MODEL_FILE, SRC_IP_VOCAB_FILE};
use crate::logic::error::ConfigError;

/// Process-wide operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Persist raw traffic for later training
    Collection,
    /// Score traffic against the trained model
    #[default]
    Realtime,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "collection" => Ok(Mode::Collection),
            "realtime" => Ok(Mode::Realtime),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Collection => write!(f, "collection"),
            Mode::Realtime => write!(f, "realtime"),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: Mode,

    /// `host:port` to listen on
    pub bind_addr: String,

    /// Records per scored batch
    pub batch_size: usize,

    /// Directory holding the stores and default artifact paths
    pub data_dir: PathBuf,

    pub max_connections: usize,

    /// Seconds without data before a connection is dropped (0 = never)
    pub idle_timeout_secs: u64,

    /// Hand off a partial batch when its connection closes
    pub flush_on_close: bool,

    /// Persist normal traffic alongside anomalies (realtime mode)
    pub persist_normal: bool,

    pub model_file: Option<PathBuf>,
    pub src_vocab_file: Option<PathBuf>,
    pub dst_vocab_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Built-in defaults with the given mode and data directory
    pub fn new(mode: Mode, data_dir: PathBuf) -> Self {
        Self {
            mode,
            bind_addr: constants::DEFAULT_BIND_ADDR.to_string(),
            batch_size: constants::DEFAULT_BATCH_SIZE,
            data_dir,
            max_connections: constants::DEFAULT_MAX_CONNECTIONS,
            idle_timeout_secs: constants::DEFAULT_IDLE_TIMEOUT_SECS,
            flush_on_close: false,
            persist_normal: false,
            model_file: None,
            src_vocab_file: None,
            dst_vocab_file: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match constants::get_mode() {
            Some(name) => name.parse()?,
            None => Mode::default(),
        };

        Ok(Self {
            mode,
            bind_addr: constants::get_bind_addr(),
            batch_size: constants::get_batch_size()?,
            data_dir: constants::get_data_dir(),
            max_connections: constants::get_max_connections()?,
            idle_timeout_secs: constants::get_idle_timeout_secs()?,
            flush_on_close: constants::is_flush_on_close_enabled(),
            persist_normal: constants::is_persist_normal_enabled(),
            model_file: constants::get_model_file(),
            src_vocab_file: constants::get_src_vocab_file(),
            dst_vocab_file: constants::get_dst_vocab_file(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }

        let valid_addr = self
            .bind_addr
            .rsplit_once(':')
            .map_or(false, |(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_addr {
            return Err(ConfigError::InvalidBindAddr(self.bind_addr.clone()));
        }

        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(MODEL_FILE))
    }

    pub fn src_vocab_path(&self) -> PathBuf {
        self.src_vocab_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(SRC_IP_VOCAB_FILE))
    }

    pub fn dst_vocab_path(&self) -> PathBuf {
        self.dst_vocab_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DST_IP_VOCAB_FILE))
    }
}
