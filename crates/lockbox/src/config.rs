//! protocol tunables
//!
//! every field has a default, so an empty toml document is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// in-sync paired helpers required before the vault counts as protected
    pub min_helpers: usize,
    /// how often keepalives go out
    pub keepalive_period_ms: u64,
    /// silence after which a helper is considered out of sync
    pub keepalive_timeout_secs: u64,
    /// qr codes shown per pairing request
    pub pairing_num_counters: usize,
    /// consecutive counters a scanner needs before accepting a request
    pub pairing_consecutive_counters: usize,
    /// handshake packets are zero padded to at least this many bytes
    pub qr_min_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_helpers: 3,
            keepalive_period_ms: 1000,
            keepalive_timeout_secs: 10,
            pairing_num_counters: 8,
            pairing_consecutive_counters: 3,
            qr_min_len: 100,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_helpers == 0 {
            return Err(Error::Config("min_helpers must be at least 1".into()));
        }
        if self.keepalive_timeout_secs == 0 {
            return Err(Error::Config("keepalive_timeout_secs must be positive".into()));
        }
        if self.pairing_num_counters == 0 || self.pairing_num_counters > 256 {
            return Err(Error::Config("pairing_num_counters must be in 1..=256".into()));
        }
        if self.pairing_consecutive_counters == 0 || self.pairing_consecutive_counters > self.pairing_num_counters {
            return Err(Error::Config(
                "pairing_consecutive_counters must be in 1..=pairing_num_counters".into(),
            ));
        }
        Ok(())
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_millis(self.keepalive_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str("min_helpers = 5\nkeepalive_timeout_secs = 30\n").unwrap();
        assert_eq!(config.min_helpers, 5);
        assert_eq!(config.keepalive_timeout_secs, 30);
        assert_eq!(config.pairing_num_counters, 8);
    }

    #[test]
    fn test_invalid_rejected() {
        assert!(Config::from_toml_str("min_helpers = 0").is_err());
        assert!(Config::from_toml_str("pairing_consecutive_counters = 9").is_err());
        assert!(Config::from_toml_str("min_helpers = \"three\"").is_err());
    }

    #[test]
    fn test_keepalive_period() {
        assert_eq!(Config::default().keepalive_period(), Duration::from_secs(1));
    }
}
