//! Slippage: adverse price adjustment of simulated fills.
//!
//! Buys slip up, sells slip down. A slipped price that leaves the bar range is
//! capped to the range when `slip_match` (or, for limit fills, `slip_limit`)
//! is set, kept as is when `slip_out` is also set, and refuses the fill otherwise.

use crate::config::SlippageConfig;

impl SlippageConfig {
    pub fn is_active(&self) -> bool {
        self.perc != 0.0 || self.fixed != 0.0
    }

    /// Buy-side fill price for a reference `price`, bounded above by `pmax`.
    /// `None` means no fill.
    pub fn slip_up(&self, pmax: f64, price: f64, doslip: bool, limit: bool) -> Option<f64> {
        if !doslip || !self.is_active() {
            return Some(price);
        }
        let slipped = if self.perc != 0.0 {
            price * (1.0 + self.perc)
        } else {
            price + self.fixed
        };
        if slipped <= pmax {
            return Some(slipped);
        }
        self.out_of_range(slipped, pmax, limit)
    }

    /// Sell-side fill price for a reference `price`, bounded below by `pmin`.
    pub fn slip_down(&self, pmin: f64, price: f64, doslip: bool, limit: bool) -> Option<f64> {
        if !doslip || !self.is_active() {
            return Some(price);
        }
        let slipped = if self.perc != 0.0 {
            price * (1.0 - self.perc)
        } else {
            price - self.fixed
        };
        if slipped >= pmin {
            return Some(slipped);
        }
        self.out_of_range(slipped, pmin, limit)
    }

    fn out_of_range(&self, slipped: f64, bound: f64, limit: bool) -> Option<f64> {
        if self.slip_match || (limit && self.slip_limit) {
            Some(if self.slip_out { slipped } else { bound })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perc(p: f64) -> SlippageConfig {
        SlippageConfig {
            perc: p,
            ..SlippageConfig::default()
        }
    }

    #[test]
    fn inactive_returns_reference_price() {
        let cfg = SlippageConfig::default();
        assert_eq!(cfg.slip_up(110.0, 100.0, true, false), Some(100.0));
        assert_eq!(cfg.slip_down(90.0, 100.0, true, false), Some(100.0));
    }

    #[test]
    fn perc_takes_precedence_over_fixed() {
        let cfg = SlippageConfig {
            perc: 0.01,
            fixed: 5.0,
            ..SlippageConfig::default()
        };
        assert_eq!(cfg.slip_up(200.0, 100.0, true, false), Some(101.0));
        assert_eq!(cfg.slip_down(0.0, 100.0, true, false), Some(99.0));
    }

    #[test]
    fn fixed_slippage() {
        let cfg = SlippageConfig {
            fixed: 0.5,
            ..SlippageConfig::default()
        };
        assert_eq!(cfg.slip_up(200.0, 100.0, true, false), Some(100.5));
        assert_eq!(cfg.slip_down(0.0, 100.0, true, false), Some(99.5));
    }

    #[test]
    fn no_slip_when_disabled_for_fill() {
        assert_eq!(perc(0.01).slip_up(200.0, 100.0, false, false), Some(100.0));
    }

    #[test]
    fn capped_to_bar_range_with_match() {
        assert_eq!(perc(0.05).slip_up(102.0, 100.0, true, false), Some(102.0));
        assert_eq!(perc(0.05).slip_down(98.0, 100.0, true, false), Some(98.0));
    }

    #[test]
    fn slip_out_keeps_price_outside_range() {
        let cfg = SlippageConfig {
            perc: 0.05,
            slip_out: true,
            ..SlippageConfig::default()
        };
        assert_eq!(cfg.slip_up(102.0, 100.0, true, false), Some(105.0));
    }

    #[test]
    fn refused_without_match() {
        let cfg = SlippageConfig {
            perc: 0.05,
            slip_match: false,
            slip_limit: false,
            ..SlippageConfig::default()
        };
        assert_eq!(cfg.slip_up(102.0, 100.0, true, false), None);
        assert_eq!(cfg.slip_up(102.0, 100.0, true, true), None);
    }

    #[test]
    fn limit_fills_capped_with_slip_limit() {
        let cfg = SlippageConfig {
            perc: 0.05,
            slip_match: false,
            ..SlippageConfig::default()
        };
        assert_eq!(cfg.slip_up(102.0, 100.0, true, true), Some(102.0));
        assert_eq!(cfg.slip_up(102.0, 100.0, true, false), None);
    }
}
