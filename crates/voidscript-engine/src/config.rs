//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::ScheduleError;

/// Settings for an [`App`](crate::app::App).
///
/// Every field has a default, so a config file only needs to name what it
/// changes:
///
/// ```
/// use voidscript_engine::config::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "logFilter": "voidscript_scene=debug" }"#).unwrap();
/// assert_eq!(config.log_filter, "voidscript_scene=debug");
/// assert!(!config.stop_on_system_error);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Seconds per frame. Must be positive and finite.
    pub fixed_dt: f64,
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
    /// Abort the rest of a frame when a system fails, instead of logging and
    /// carrying on.
    pub stop_on_system_error: bool,
}

impl Default for EngineConfig {
    /// 60 Hz, `warn` logging, failing systems do not stop the frame.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            log_filter: "warn".to_owned(),
            stop_on_system_error: false,
        }
    }
}

impl EngineConfig {
    /// Parse and validate.
    pub fn from_json_str(text: &str) -> Result<Self, ScheduleError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject a `fixed_dt` that is not positive and finite.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ScheduleError::InvalidConfig {
                details: format!("fixed_dt must be positive and finite, got {}", self.fixed_dt),
            });
        }
        Ok(())
    }
}
