//! Serializable broker configuration, loadable from TOML.

use crate::commission::CommissionSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log output configuration. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"brokerlab_core=debug"`.
    pub level: String,
    /// Single-line output.
    pub compact: bool,
    pub with_target: bool,
    pub with_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            compact: true,
            with_target: true,
            with_timestamps: true,
        }
    }
}

/// Price slippage applied to simulated fills.
///
/// `perc` takes precedence over `fixed` when both are non-zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlippageConfig {
    /// Fraction of the price (0.01 = 1%).
    pub perc: f64,
    /// Absolute price points.
    pub fixed: f64,
    /// Slip fills that happen at the bar open.
    pub slip_open: bool,
    /// Slip limit fills (still capped by the limit price).
    pub slip_limit: bool,
    /// Cap a slipped price outside the bar range to the range instead of refusing the fill.
    pub slip_match: bool,
    /// Allow the slipped price to fall outside the bar range.
    pub slip_out: bool,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            perc: 0.0,
            fixed: 0.0,
            slip_open: false,
            slip_limit: true,
            slip_match: true,
            slip_out: false,
        }
    }
}

/// Configuration of the bar-driven simulated broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Starting cash.
    pub cash: f64,
    /// Pre-check submitted orders against available cash.
    pub check_submit: bool,
    /// Short sales of notional instruments credit cash (and count as negative value).
    pub short_cash: bool,
    /// Fill market orders at the close of the bar they were created on.
    pub cheat_on_close: bool,
    /// Add accrued credit interest to the commission of the closing leg.
    pub interest_to_pnl: bool,
    pub fund_mode: bool,
    pub fund_start_value: f64,
    pub slippage: SlippageConfig,
    /// Default commission scheme.
    pub commission: CommissionSettings,
    pub logging: LoggingConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cash: 10_000.0,
            check_submit: true,
            short_cash: true,
            cheat_on_close: false,
            interest_to_pnl: true,
            fund_mode: false,
            fund_start_value: 100.0,
            slippage: SlippageConfig::default(),
            commission: CommissionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn with_cash(mut self, cash: f64) -> Self {
        self.cash = cash;
        self
    }

    pub fn with_commission(mut self, commission: CommissionSettings) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_slippage(mut self, slippage: SlippageConfig) -> Self {
        self.slippage = slippage;
        self
    }

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
        if self.cash.is_nan() || self.cash < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "cash must be non-negative, got {}",
                self.cash
            )));
        }
        if self.slippage.perc < 0.0 || self.slippage.fixed < 0.0 {
            return Err(ConfigError::Invalid(
                "slippage perc and fixed must be non-negative".into(),
            ));
        }
        if self.commission.leverage.is_nan() || self.commission.leverage <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "leverage must be positive, got {}",
                self.commission.leverage
            )));
        }
        if self.fund_mode && self.fund_start_value <= 0.0 {
            return Err(ConfigError::Invalid(
                "fund_start_value must be positive in fund mode".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommType;

    #[test]
    fn defaults_are_valid() {
        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config = BrokerConfig::from_toml_str(
            r#"
            cash = 50000.0
            cheat_on_close = true

            [slippage]
            perc = 0.001

            [commission]
            commission = 2.0
            margin = 2000.0
            mult = 10.0
            comm_type = "fixed"
            name = "ES"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.cash, 50_000.0);
        assert!(config.cheat_on_close);
        assert!(config.check_submit);
        assert_eq!(config.slippage.perc, 0.001);
        assert!(config.slippage.slip_match);
        assert_eq!(config.commission.comm_type, Some(CommType::Fixed));
        assert_eq!(config.commission.name.as_deref(), Some("ES"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn automargin_parses_tagged() {
        let config = BrokerConfig::from_toml_str(
            r#"
            [commission.automargin]
            type = "FACTOR"
            factor = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(
            config.commission.automargin,
            crate::commission::AutoMargin::Factor { factor: 0.2 }
        );
    }

    #[test]
    fn rejects_negative_cash() {
        let err = BrokerConfig::from_toml_str("cash = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_leverage() {
        let mut config = BrokerConfig::default();
        config.commission.leverage = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(
            BrokerConfig::from_toml_str("cash = [").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BrokerConfig::load(Path::new("/nonexistent/brokerlab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
