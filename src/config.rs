//! Monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables shared by the poller and the event waiter.
///
/// Durations are expressed in milliseconds when loaded from JSON:
///
/// ```
/// use taskwatch::MonitorConfig;
///
/// let cfg = MonitorConfig::from_json_str(r#"{"poll_interval_ms": 250}"#).unwrap();
/// assert_eq!(cfg.poll_interval(), Some(std::time::Duration::from_millis(250)));
/// assert_eq!(cfg.state_path, "info.state");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between poller reads. `None` or `0` reads back-to-back.
    pub poll_interval_ms: Option<u64>,
    /// Upper bound on a single `wait_for_updates` call. `None` blocks until
    /// the remote side reports something.
    pub max_wait_ms: Option<u64>,
    /// Path of the whole status object.
    pub status_path: String,
    /// Path of the state sub-field.
    pub state_path: String,
    /// Path of the error sub-field.
    pub error_path: String,
    /// Also subscribe to the whole status object, not just the state field.
    pub watch_status_object: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Some(1000),
            max_wait_ms: None,
            status_path: "info".to_string(),
            state_path: "info.state".to_string(),
            error_path: "info.error".to_string(),
            watch_status_object: true,
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a JSON config document. Missing fields take their
    /// defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that every property path is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = [
            ("status_path", &self.status_path),
            ("state_path", &self.state_path),
            ("error_path", &self.error_path),
        ];
        for (field, value) in paths {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyPath { field });
            }
        }
        Ok(())
    }

    /// Poller sleep as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Bound on a single wait call as a duration.
    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    /// Paths the event waiter subscribes to.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<String> {
        if self.watch_status_object {
            vec![self.status_path.clone()]
        } else {
            vec![self.state_path.clone(), self.error_path.clone()]
        }
    }
}
