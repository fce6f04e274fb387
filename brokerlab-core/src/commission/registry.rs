use super::scheme::{CommissionScheme, CommissionSettings};
use std::collections::HashMap;

/// Commission schemes keyed by instrument, falling back to one default scheme.
#[derive(Debug, Clone, Default)]
pub struct CommissionRegistry {
    default: CommissionScheme,
    by_instrument: HashMap<String, CommissionScheme>,
}

impl CommissionRegistry {
    pub fn new(default: CommissionScheme) -> Self {
        Self {
            default,
            by_instrument: HashMap::new(),
        }
    }

    /// Scheme for `symbol`, or the default when none is registered.
    pub fn get(&self, symbol: &str) -> &CommissionScheme {
        self.by_instrument.get(symbol).unwrap_or(&self.default)
    }

    pub fn default_scheme(&self) -> &CommissionScheme {
        &self.default
    }

    /// Build a scheme from `settings` and install it under `settings.name`.
    pub fn set_commission(&mut self, settings: &CommissionSettings) -> &CommissionScheme {
        let scheme = CommissionScheme::new(settings);
        match settings.name.as_deref() {
            Some(symbol) => {
                self.by_instrument.insert(symbol.to_string(), scheme);
                &self.by_instrument[symbol]
            }
            None => {
                self.default = scheme;
                &self.default
            }
        }
    }

    pub fn has_override(&self, symbol: &str) -> bool {
        self.by_instrument.contains_key(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommType;

    #[test]
    fn falls_back_to_default() {
        let reg = CommissionRegistry::default();
        assert!(reg.get("ES").is_stocklike());
        assert!(!reg.has_override("ES"));
    }

    #[test]
    fn instrument_override_wins() {
        let mut reg = CommissionRegistry::default();
        reg.set_commission(
            &CommissionSettings::default()
                .with_commission(2.0)
                .with_margin(2000.0)
                .with_mult(10.0)
                .for_instrument("ES"),
        );
        assert!(!reg.get("ES").is_stocklike());
        assert_eq!(reg.get("ES").comm_type(), CommType::Fixed);
        assert!(reg.get("SPY").is_stocklike());
    }

    #[test]
    fn unnamed_settings_replace_default() {
        let mut reg = CommissionRegistry::default();
        reg.set_commission(&CommissionSettings::default().with_commission(0.001));
        assert_eq!(reg.get("anything").rate(), 0.001);
        assert_eq!(reg.default_scheme().rate(), 0.001);
    }
}
