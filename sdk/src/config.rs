//! Client configuration: a JSON5 file (or defaults) plus a `--config` CLI
//! flag, in the shape of `turn-server/src/config.rs` — per-field
//! `#[serde(default = "...")]` functions, a `Log` section, a `clap::Parser`
//! wrapper around the file path. The teacher parses TOML; this runtime
//! parses JSON5 instead, exercising the `serde_json5` dependency the
//! teacher's own `Cargo.toml` declares but never reads from.

use std::fs::read_to_string;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

fn default_cpo() -> String {
    "tcp+k2rpc://127.0.0.1:9000".to_string()
}

fn default_create_collection_deadline() -> Duration {
    Duration::from_secs(1)
}

fn default_retention_window() -> Duration {
    Duration::from_secs(600)
}

fn default_txn_end_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_timestamp_batch_size() -> u32 {
    1000
}

fn default_max_routing_retries() -> u32 {
    3
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Static bootstrap peers a client may dial before any CPO round-trip has
/// happened (spec.md section 6: `tcp_remotes`).
#[derive(Clone, Debug, Deserialize, Default)]
pub struct Remotes {
    #[serde(default)]
    pub tcp_remotes: Vec<String>,
}

/// Recognized options, spec.md section 6.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// The placement-oracle endpoint.
    #[serde(default = "default_cpo")]
    pub cpo: String,

    #[serde(default)]
    pub remotes: Remotes,

    #[serde(default = "default_create_collection_deadline", with = "duration_secs")]
    pub create_collection_deadline: Duration,

    #[serde(default = "default_retention_window", with = "duration_secs")]
    pub retention_window: Duration,

    #[serde(default = "default_txn_end_deadline", with = "duration_secs")]
    pub txn_end_deadline: Duration,

    /// How many timestamps the timestamp client pulls per oracle round-trip.
    #[serde(default = "default_timestamp_batch_size")]
    pub timestamp_batch_size: u32,

    /// Bound on CPO routing-refresh retries per `partition_request` call.
    #[serde(default = "default_max_routing_retries")]
    pub max_routing_retries: u32,

    #[serde(default)]
    pub log: Log,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cpo: default_cpo(),
            remotes: Remotes::default(),
            create_collection_deadline: default_create_collection_deadline(),
            retention_window: default_retention_window(),
            txn_end_deadline: default_txn_end_deadline(),
            timestamp_batch_size: default_timestamp_batch_size(),
            max_routing_retries: default_max_routing_retries(),
            log: Log::default(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[derive(Parser)]
#[command(
    about = "K23SI transactional client runtime",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to a JSON5 configuration file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<String>,
}

impl ClientConfig {
    /// Parse `--config <path>` from the process arguments, if present, and
    /// load the named file; otherwise fall back to defaults. Mirrors
    /// `turn_server::config::Config::load`.
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();
        Self::load_from(cli.config)
    }

    pub fn load_from(path: Option<String>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let contents = read_to_string(&path)?;
                Ok(serde_json5::from_str(&contents)?)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClientConfig::default();
        assert_eq!(config.create_collection_deadline, Duration::from_secs(1));
        assert_eq!(config.retention_window, Duration::from_secs(600));
        assert_eq!(config.txn_end_deadline, Duration::from_secs(60));
    }

    #[test]
    fn parses_json5_overrides() {
        let json5 = r#"{
            cpo: "tcp+k2rpc://10.0.0.1:9000",
            retention_window: 1200,
            log: { level: "debug" },
        }"#;
        let config: ClientConfig = serde_json5::from_str(json5).unwrap();
        assert_eq!(config.cpo, "tcp+k2rpc://10.0.0.1:9000");
        assert_eq!(config.retention_window, Duration::from_secs(1200));
        assert_eq!(config.log.level, LogLevel::Debug);
    }
}
