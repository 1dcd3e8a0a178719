//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every value can be overridden from the environment (or a `.env` file),
//! and the `serve` subcommand flags override the environment in turn.

use std::path::PathBuf;
use std::str::FromStr;

use crate::logic::error::ConfigError;

/// Default bind address for the ingestion listener
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Default number of records scored together
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Bytes requested per socket read
pub const READ_BUFFER_SIZE: usize = 4096;

/// Longest line kept while waiting for its `\n`; longer lines are dropped
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Default cap on concurrently handled connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default idle timeout between reads (seconds, 0 = wait forever)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Capacity of the channel feeding the result router
pub const ROUTER_CHANNEL_CAPACITY: usize = 256;

/// File names inside the data directory
pub const COLLECTION_FILE: &str = "network_traffic.csv";
pub const ANOMALY_FILE: &str = "anomalies.csv";
pub const NORMAL_FILE: &str = "normal_traffic.csv";
pub const MODEL_FILE: &str = "anomaly_model.json";
pub const SRC_IP_VOCAB_FILE: &str = "src_ip_vocab.json";
pub const DST_IP_VOCAB_FILE: &str = "dst_ip_vocab.json";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "netflow-sentinel";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get operating mode name from environment (parsed by the config layer)
pub fn get_mode() -> Option<String> {
    std::env::var("SENTINEL_MODE").ok()
}

/// Get bind address from environment or use default
pub fn get_bind_addr() -> String {
    std::env::var("SENTINEL_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
}

/// Get batch size from environment or use default
pub fn get_batch_size() -> Result<usize, ConfigError> {
    env_number("SENTINEL_BATCH_SIZE", DEFAULT_BATCH_SIZE)
}

/// Get data directory from environment or use the platform data dir
pub fn get_data_dir() -> PathBuf {
    std::env::var("SENTINEL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
        })
}

/// Get connection cap from environment or use default
pub fn get_max_connections() -> Result<usize, ConfigError> {
    env_number("SENTINEL_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)
}

/// Get idle timeout from environment or use default
pub fn get_idle_timeout_secs() -> Result<u64, ConfigError> {
    env_number("SENTINEL_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)
}

/// Check if a partial batch should be flushed when its connection closes
pub fn is_flush_on_close_enabled() -> bool {
    env_flag("SENTINEL_FLUSH_ON_CLOSE")
}

/// Check if normal traffic should be persisted in realtime mode
pub fn is_persist_normal_enabled() -> bool {
    env_flag("SENTINEL_PERSIST_NORMAL")
}

/// Optional artifact path overrides
pub fn get_model_file() -> Option<PathBuf> {
    std::env::var("SENTINEL_MODEL_FILE").ok().map(PathBuf::from)
}

pub fn get_src_vocab_file() -> Option<PathBuf> {
    std::env::var("SENTINEL_SRC_VOCAB_FILE").ok().map(PathBuf::from)
}

pub fn get_dst_vocab_file() -> Option<PathBuf> {
    std::env::var("SENTINEL_DST_VOCAB_FILE").ok().map(PathBuf::from)
}

/// A set but unparsable number is an error, not the default
fn env_number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    parse_number_var(name, std::env::var(name).ok(), default)
}

fn parse_number_var<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber { var: name, value: raw }),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|s| {
            let s = s.to_lowercase();
            s == "true" || s == "1" || s == "yes"
        })
        .unwrap_or(false)
}
