//! Scheduler configuration
//!
//! Loaded from JSON; every field is optional.
//!
//! ```json
//! { "default_channel": "think", "quota_percent": 0.6 }
//! ```

use crate::error::{Error, Result};
use crate::kernel::Channel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Channel used by factories that do not pick one
    pub default_channel: Channel,
    /// Budget fraction used by `QuotaMonitor::checkpoint`
    pub quota_percent: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_channel: Channel::PRIMARY,
            quota_percent: 0.8,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quota_percent) {
            return Err(Error::InvalidQuota(self.quota_percent));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = SchedulerConfig::from_json("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.default_channel, Channel::PRIMARY);
    }

    #[test]
    fn test_fields_override_defaults() {
        let config =
            SchedulerConfig::from_json(r#"{ "default_channel": "think", "quota_percent": 0.25 }"#)
                .unwrap();
        assert_eq!(config.default_channel.name(), "think");
        assert_eq!(config.quota_percent, 0.25);
    }

    #[test]
    fn test_out_of_range_quota_rejected() {
        let err = SchedulerConfig::from_json(r#"{ "quota_percent": 1.5 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidQuota(p) if p == 1.5));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = SchedulerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = SchedulerConfig {
            default_channel: Channel::new("slow"),
            quota_percent: 0.5,
        };
        let text = config.to_json().unwrap();
        assert_eq!(SchedulerConfig::from_json(&text).unwrap(), config);
    }
}
