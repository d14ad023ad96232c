//! Bridge configuration.
//!
//! Loaded in layers, lowest priority first:
//! 1. Default values
//! 2. Optional config file `config/workflow-bridge.{toml,yaml,json}`
//! 3. Environment variables prefixed with `WORKFLOW_BRIDGE_`
//!
//! ```rust,ignore
//! use workflow_bridge::config::BridgeConfig;
//!
//! // WORKFLOW_BRIDGE_WAIT_TIMEOUT_MS=30000 WORKFLOW_BRIDGE_ABORT_POLICY=release
//! let config = BridgeConfig::load()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, ConfigResult};

/// What an engine abort does to a waiting run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Only invoke `on_aborted`. The run keeps waiting for a completed or
    /// failed callback.
    #[default]
    Notify,
    /// Invoke `on_aborted`, then terminate the run as [`Termination::Aborted`].
    ///
    /// [`Termination::Aborted`]: crate::gate::Termination::Aborted
    Release,
}

/// Settings for one [`ExecutionBridge`](crate::ExecutionBridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound on the terminal wait, in milliseconds. `None` waits forever.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    /// Abort handling.
    #[serde(default)]
    pub abort_policy: AbortPolicy,
    /// Default log filter for [`init_tracing`](crate::telemetry::init_tracing).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: None,
            abort_policy: AbortPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the config file and environment.
    pub fn load() -> ConfigResult<Self> {
        let config = config::Config::builder()
            .set_default("log_level", default_log_level())?
            .add_source(config::File::with_name("config/workflow-bridge").required(false))
            .add_source(
                config::Environment::with_prefix("WORKFLOW_BRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already assembled [`config::Config`].
    pub fn from_config(config: config::Config) -> ConfigResult<Self> {
        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.wait_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "wait_timeout_ms",
                message: "must be greater than zero; omit it to wait without a bound".to_string(),
            });
        }
        if let Err(e) = EnvFilter::try_new(&self.log_level) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                message: e.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1));
        self
    }

    #[must_use]
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }
}
