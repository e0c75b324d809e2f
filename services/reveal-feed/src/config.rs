//! Service configuration.
//!
//! Defaults come from [`ServiceConfig::default`]; environment variables with
//! the `REVEAL_` prefix override them (`REVEAL_LEAD_TIME_SECS=25`). A bare
//! `PORT` is honoured when `REVEAL_PORT` is not set.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::clock::ClockAligner;
use crate::scheduler::SchedulerConfig;

/// Prefix for service environment variables.
pub const ENV_PREFIX: &str = "REVEAL";
/// Fallback port variable used by common hosting platforms.
pub const PORT_ENV_VAR: &str = "PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Listening port.
    pub port: u16,
    /// Seconds before each minute boundary at which the digit is generated
    /// and previewed.
    pub lead_time_secs: u64,
    /// Maximum history length (`N_max`).
    pub history_max: usize,
    /// Durable history file.
    pub history_path: PathBuf,
    /// Emit `preview` events.
    pub preview_enabled: bool,
    /// Results included in the init event.
    pub init_history_len: usize,
    /// Per-subscriber outbound queue length.
    pub subscriber_queue: usize,
    /// SSE keep-alive interval.
    pub keep_alive_secs: u64,
    /// Delay used when the scheduler is already late for a reveal.
    pub catch_up_delay_ms: u64,
    /// Optional directory served for unmatched paths.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            lead_time_secs: 35,
            history_max: 500,
            history_path: PathBuf::from("data/history.json"),
            preview_enabled: true,
            init_history_len: 20,
            subscriber_queue: 32,
            keep_alive_secs: 15,
            catch_up_delay_ms: 1000,
            static_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `vars` instead of the process environment when given.
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        use ::config::{Config, Environment};

        let port_fallback = match &vars {
            Some(vars) => vars.get(PORT_ENV_VAR).cloned(),
            None => std::env::var(PORT_ENV_VAR).ok(),
        };

        let mut builder = Config::builder();
        if let Some(port) = port_fallback {
            // Defaults rank below every source, so REVEAL_PORT still wins.
            builder = builder.set_default("port", port)?;
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars.map(|v| v.into_iter().collect())),
            )
            .build()?;

        let config: ServiceConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lead_time_secs > ClockAligner::MAX_LEAD_SECS {
            return Err(ConfigError::Invalid {
                field: "lead_time_secs",
                reason: format!(
                    "{} exceeds {}",
                    self.lead_time_secs,
                    ClockAligner::MAX_LEAD_SECS
                ),
            });
        }
        if self.history_max == 0 {
            return Err(ConfigError::Invalid {
                field: "history_max",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.subscriber_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "subscriber_queue",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "keep_alive_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.catch_up_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "catch_up_delay_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        // A late cycle must still generate before its boundary.
        let lead_ms = self.lead_time_secs * 1000;
        if lead_ms > 0 && self.catch_up_delay_ms >= lead_ms {
            return Err(ConfigError::Invalid {
                field: "catch_up_delay_ms",
                reason: format!(
                    "{} must be shorter than the {} ms lead time",
                    self.catch_up_delay_ms, lead_ms
                ),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn aligner(&self) -> ClockAligner {
        ClockAligner::new(self.lead_time_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            preview_enabled: self.preview_enabled,
            catch_up_delay: Duration::from_millis(self.catch_up_delay_ms),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}
