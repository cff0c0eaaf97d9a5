use crate::error::KeymasterError;
use crate::KeymasterResult;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// What a monitor does when the event queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait until the dispatcher makes room.
    #[default]
    Block,
    /// Fail the push with [`KeymasterError::QueueFull`], which stops the monitor.
    Reject,
}

/// Dispatcher settings.
///
/// ```toml
/// print_failures = true
/// trace_events = false
/// queue_capacity = 16
/// shutdown_grace_secs = 5
/// queue_policy = "block"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log the failures of the monitors and of device opening.
    pub print_failures: bool,
    /// Log every event read from a device.
    pub trace_events: bool,
    /// The number of events the queue holds before monitors are held back.
    pub queue_capacity: usize,
    /// How long `stop` waits for the background tasks before aborting them.
    pub shutdown_grace_secs: u64,
    pub queue_policy: QueuePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_failures: true,
            trace_events: false,
            queue_capacity: 16,
            shutdown_grace_secs: 5,
            queue_policy: QueuePolicy::default(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML configuration. Missing keys take their default value.
    pub fn from_toml_str(s: &str) -> KeymasterResult<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    /// Load the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> KeymasterResult<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> KeymasterResult<()> {
        if self.queue_capacity == 0 {
            return Err(KeymasterError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
