//! Client configuration.
//!
//! Loaded from a TOML file and `RIGOLSCOPE_`-prefixed environment variables,
//! environment taking precedence. Every field has a default, so an empty file
//! (or no file at all) yields [`ScopeConfig::default`].
//!
//! ```no_run
//! use rigolscope_rs::ScopeConfig;
//!
//! let config = ScopeConfig::load_from("rigolscope.toml")?;
//! println!("chunk size: {} points", config.chunk_points);
//! # Ok::<(), rigolscope_rs::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `RIGOLSCOPE_STRICT=true`.
pub const ENV_PREFIX: &str = "RIGOLSCOPE_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Per-call transport timeout in milliseconds
    pub timeout_ms: u64,
    /// Pause between writing a query and reading its answer
    pub query_delay_ms: u64,
    /// Largest number of bytes requested from the transport in one read
    pub read_chunk_bytes: usize,
    /// Largest number of samples fetched with a single `:WAV:DATA?`
    pub chunk_points: usize,
    /// Abort a waveform retrieval on the first failed chunk instead of leaving a gap
    pub strict: bool,
    pub trigger_poll_ms: u64,
    /// Pause before the first trigger-position poll
    pub trigger_settle_ms: u64,
    /// Pause between `:SING` and `:TFORCE`
    pub force_settle_ms: u64,
    pub stop_poll_ms: u64,
    pub stop_timeout_ms: u64,
    pub clear_settle_ms: u64,
    pub serial_baud: u32,
    pub socket_port: u16,
    /// Hosts offered as raw-socket resources during discovery
    pub socket_hosts: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            query_delay_ms: 200,
            read_chunk_bytes: 1_024_000,
            chunk_points: 250_000,
            strict: false,
            trigger_poll_ms: 100,
            trigger_settle_ms: 100,
            force_settle_ms: 1000,
            stop_poll_ms: 500,
            stop_timeout_ms: 10_000,
            clear_settle_ms: 500,
            serial_baud: 9600,
            socket_port: 5555,
            socket_hosts: Vec::new(),
        }
    }
}

impl ScopeConfig {
    /// Load from the given TOML file (if it exists) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));
        Self::extract(&figment)
    }

    /// Parse a TOML document, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let figment =
            Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_points == 0 {
            return Err(ConfigError::Invalid("chunk_points must be positive".into()));
        }
        if self.read_chunk_bytes == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_bytes must be positive".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_chunk_points(mut self, chunk_points: usize) -> Self {
        self.chunk_points = chunk_points;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn trigger_poll(&self) -> Duration {
        Duration::from_millis(self.trigger_poll_ms)
    }

    pub fn trigger_settle(&self) -> Duration {
        Duration::from_millis(self.trigger_settle_ms)
    }

    pub fn force_settle(&self) -> Duration {
        Duration::from_millis(self.force_settle_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn clear_settle(&self) -> Duration {
        Duration::from_millis(self.clear_settle_ms)
    }
}
