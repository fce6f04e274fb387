//! Commission scheme: costing, valuation and profit-and-loss per instrument.
//!
//! Two regimes:
//! - notional (stocklike): cost and value are `size * price`, commission is a
//!   percentage of the traded value;
//! - margin-based (futures-like): cost and value are `|size| * margin`,
//!   commission is a fixed amount per unit, PnL is scaled by the multiplier and
//!   cash is marked to market through [`CommissionScheme::cash_adjust`].

use crate::domain::Position;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// How the commission rate is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommType {
    /// Rate is a fraction of the traded value.
    Percentage,
    /// Rate is a flat amount per unit.
    Fixed,
}

/// Margin derivation for margin-based instruments.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoMargin {
    /// Use the configured margin.
    #[default]
    Off,
    /// Margin equals `price * multiplier`.
    PriceTimesMultiplier,
    /// Margin equals `factor * price`.
    Factor { factor: f64 },
}

/// Every option accepted when installing a commission scheme.
///
/// `comm_type: None` selects the legacy defaults: a margin makes the instrument
/// futures-like with fixed commission, no margin makes it stocklike with
/// percentage commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    pub commission: f64,
    pub margin: Option<f64>,
    pub mult: f64,
    pub comm_type: Option<CommType>,
    /// `true`: a percentage rate is already a fraction (0.005 = 0.5%).
    /// `false`: it is given in percent units and divided by 100.
    pub percent_abs: bool,
    pub stocklike: bool,
    /// Yearly credit interest rate charged on open positions.
    pub interest: f64,
    pub interest_long: bool,
    pub leverage: f64,
    pub automargin: AutoMargin,
    /// Instrument this scheme applies to. `None` installs the default scheme.
    pub name: Option<String>,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            commission: 0.0,
            margin: None,
            mult: 1.0,
            comm_type: None,
            percent_abs: true,
            stocklike: false,
            interest: 0.0,
            interest_long: false,
            leverage: 1.0,
            automargin: AutoMargin::Off,
            name: None,
        }
    }
}

impl CommissionSettings {
    pub fn with_commission(mut self, rate: f64) -> Self {
        self.commission = rate;
        self
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = Some(margin);
        self
    }

    pub fn with_mult(mut self, mult: f64) -> Self {
        self.mult = mult;
        self
    }

    pub fn with_comm_type(mut self, comm_type: CommType) -> Self {
        self.comm_type = Some(comm_type);
        self
    }

    pub fn with_stocklike(mut self, stocklike: bool) -> Self {
        self.stocklike = stocklike;
        self
    }

    pub fn with_interest(mut self, rate: f64, on_longs: bool) -> Self {
        self.interest = rate;
        self.interest_long = on_longs;
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_automargin(mut self, automargin: AutoMargin) -> Self {
        self.automargin = automargin;
        self
    }

    pub fn for_instrument(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Resolved commission scheme. Construct through [`CommissionScheme::new`] so
/// the defaulting rules are applied exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionScheme {
    rate: f64,
    margin: f64,
    mult: f64,
    comm_type: CommType,
    stocklike: bool,
    interest: f64,
    interest_long: bool,
    leverage: f64,
    automargin: AutoMargin,
}

impl CommissionScheme {
    pub fn new(settings: &CommissionSettings) -> Self {
        let has_margin = matches!(settings.margin, Some(m) if m != 0.0);
        let (comm_type, stocklike) = match settings.comm_type {
            Some(ct) => (ct, settings.stocklike),
            None if has_margin => (CommType::Fixed, false),
            None => (CommType::Percentage, true),
        };

        let mut margin = settings.margin.unwrap_or(0.0);
        if !stocklike && margin == 0.0 {
            margin = 1.0;
        }

        let mut rate = settings.commission;
        if comm_type == CommType::Percentage && !settings.percent_abs {
            rate /= 100.0;
        }

        Self {
            rate,
            margin,
            mult: settings.mult,
            comm_type,
            stocklike,
            interest: settings.interest,
            interest_long: settings.interest_long,
            leverage: settings.leverage,
            automargin: settings.automargin,
        }
    }

    /// Zero-cost notional scheme.
    pub fn stocklike_free() -> Self {
        Self::new(&CommissionSettings::default())
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn mult(&self) -> f64 {
        self.mult
    }

    pub fn comm_type(&self) -> CommType {
        self.comm_type
    }

    pub fn is_stocklike(&self) -> bool {
        self.stocklike
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    /// Margin per unit at `price`.
    pub fn margin(&self, price: f64) -> f64 {
        match self.automargin {
            AutoMargin::Off => self.margin,
            AutoMargin::PriceTimesMultiplier => price * self.mult,
            AutoMargin::Factor { factor } => factor * price,
        }
    }

    /// Cash needed to open `size` units at `price`.
    pub fn operation_cost(&self, size: f64, price: f64) -> f64 {
        if self.stocklike {
            size.abs() * price
        } else {
            size.abs() * self.margin(price)
        }
    }

    /// Value of `size` units at `price`. Signed for notional instruments.
    pub fn value_size(&self, size: f64, price: f64) -> f64 {
        if self.stocklike {
            size * price
        } else {
            size.abs() * self.margin(price)
        }
    }

    /// Value of a whole position at `price`.
    pub fn position_value(&self, position: &Position, price: f64) -> f64 {
        self.value_size(position.size, price)
    }

    pub fn commission(&self, size: f64, price: f64) -> f64 {
        match self.comm_type {
            CommType::Percentage => size.abs() * self.rate * price,
            CommType::Fixed => size.abs() * self.rate,
        }
    }

    /// Realized profit of `size` units moving from `entry` to `exit`.
    pub fn profit_and_loss(&self, size: f64, entry: f64, exit: f64) -> f64 {
        size * (exit - entry) * self.mult
    }

    /// Mark-to-market cash movement. Always zero for notional instruments.
    pub fn cash_adjust(&self, size: f64, base: f64, price: f64) -> f64 {
        if self.stocklike {
            0.0
        } else {
            size * (price - base) * self.mult
        }
    }

    /// Interest owed on `position` for the days elapsed since its last update.
    pub fn credit_interest(&self, position: &Position, price: f64, now: NaiveDateTime) -> f64 {
        if self.interest == 0.0 || position.is_flat() {
            return 0.0;
        }
        if position.is_long() && !self.interest_long {
            return 0.0;
        }
        let Some(since) = position.updated_at else {
            return 0.0;
        };
        let days = (now.date() - since.date()).num_days();
        if days <= 0 {
            return 0.0;
        }
        days as f64 * (self.interest / 365.0) * position.size.abs() * price
    }

    /// Largest whole size affordable with `cash` at `price`.
    pub fn size_for_cash(&self, cash: f64, price: f64) -> f64 {
        let unit = if self.stocklike {
            price
        } else {
            self.margin(price)
        };
        if unit <= 0.0 {
            return 0.0;
        }
        (self.leverage * (cash / unit).floor()).trunc()
    }
}

impl Default for CommissionScheme {
    fn default() -> Self {
        Self::stocklike_free()
    }
}
