//! Client configuration.
//!
//! Values are merged from three sources, later ones overriding earlier:
//! 1. Defaults from code
//! 2. The file named by `CONFIG_PATH` (if set)
//! 3. Environment variables prefixed with `ZK__`, e.g. `ZK__SESSION_TIMEOUT_MS=30000`


use std::env;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::Error;
use crate::Result;

/// How events reach their handlers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// A dedicated dispatch thread drains the event queue
    #[default]
    Thread,
    /// No dispatch thread; the owner calls `dispatch_next_callback` when the
    /// readiness handle becomes readable
    Manual,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound `open` waits for the session to reach `Connected`
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Session timeout negotiated by the backend
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// How often `open` polls the backend state while waiting
    #[serde(default = "default_connect_poll_interval_ms")]
    pub connect_poll_interval_ms: u64,

    /// How long `close` waits for the dispatch thread before giving up on it
    #[serde(default = "default_dispatch_join_grace_ms")]
    pub dispatch_join_grace_ms: u64,

    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    /// Drain the readiness pipe on every pop. Turned off automatically once the
    /// readiness handle is handed out.
    #[serde(default = "default_clear_reads_on_pop")]
    pub clear_reads_on_pop: bool,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_connect_poll_interval_ms() -> u64 {
    100
}

fn default_dispatch_join_grace_ms() -> u64 {
    3_000
}

fn default_clear_reads_on_pop() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            connect_poll_interval_ms: default_connect_poll_interval_ms(),
            dispatch_join_grace_ms: default_dispatch_join_grace_ms(),
            dispatch_mode: DispatchMode::default(),
            clear_reads_on_pop: default_clear_reads_on_pop(),
        }
    }
}

impl ClientConfig {
    /// Load defaults, then `CONFIG_PATH`, then `ZK__*` environment variables.
    ///
    /// Not validated; call [`Self::validate`] once all overrides are applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layer the file at `path` over the current values. Environment variables
    /// still take precedence.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        if self.connect_poll_interval_ms == 0 {
            return Err(invalid("connect_poll_interval_ms must be greater than 0"));
        }
        if self.session_timeout_ms == 0 {
            return Err(invalid("session_timeout_ms must be greater than 0"));
        }
        if self.connect_poll_interval_ms > self.connect_timeout_ms && self.connect_timeout_ms > 0 {
            return Err(invalid(format!(
                "connect_poll_interval_ms ({}) exceeds connect_timeout_ms ({})",
                self.connect_poll_interval_ms, self.connect_timeout_ms
            )));
        }
        if self.dispatch_join_grace_ms == 0 {
            return Err(invalid("dispatch_join_grace_ms must be greater than 0"));
        }
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }

    pub fn dispatch_join_grace(&self) -> Duration {
        Duration::from_millis(self.dispatch_join_grace_ms)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(msg.into()))
}
