use std::{net::SocketAddr, path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{
    constants::{DEFAULT_BROADCAST_CAPACITY, DEFAULT_WINNER_POINTS},
    retry::RetryPolicy,
};

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// RUST_LOG compatible settings string. Default "info"
    #[serde(default = "default_log")]
    pub log: String,

    /// sqlx sqlite url, e.g. "sqlite://bonus_hunt.db" or "sqlite::memory:"
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Upper bound on any single store operation.
    #[serde(default = "default_store_timeout")]
    pub store_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_winner_points")]
    pub default_winner_points: i64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
}

fn default_log() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_metrics_port() -> u16 {
    8080
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

fn default_winner_points() -> i64 {
    DEFAULT_WINNER_POINTS
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

impl Settings {
    /// Load Settings from a given path. Settings are loaded from a given
    /// optional path and can be overriden with environment variables.
    ///
    /// Environment overrides have the same name as the entries in the settings
    /// file in uppercase and prefixed with "BONUS_HUNT__". For example
    /// "BONUS_HUNT__LOG" will override the log setting.
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        if let Some(file) = path {
            builder = builder
                .add_source(File::with_name(&file.as_ref().to_string_lossy()).required(false));
        }
        builder
            .add_source(Environment::with_prefix("BONUS_HUNT").separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}
