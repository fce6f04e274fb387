//! Live adapter configuration, loadable from TOML.

use std::path::Path;

use brokerlab_core::commission::CommissionSettings;
use brokerlab_core::config::{ConfigError, LoggingConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    /// Client id of this connection; part of every OCA group name.
    pub client_id: i32,
    /// Adopt positions already open at the venue on start.
    pub use_positions: bool,
    /// Local commission scheme, used for order values and PnL when the venue
    /// reports none.
    pub commission: CommissionSettings,
    pub logging: LoggingConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            use_positions: true,
            commission: CommissionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LiveConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id < 0 {
            return Err(ConfigError::Invalid(format!(
                "client_id must be non-negative, got {}",
                self.client_id
            )));
        }
        if self.commission.leverage.is_nan() || self.commission.leverage <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "leverage must be positive, got {}",
                self.commission.leverage
            )));
        }
        Ok(())
    }
}
