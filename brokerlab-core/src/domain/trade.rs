//! Trade: a flat → open → … → flat lifecycle on one instrument.
//!
//! A trade is fed by the opening and closing legs of order fills. It opens when
//! its size leaves zero and closes when it returns to zero; a reversal closes
//! the current trade and the opening leg starts a new one (see `broker::trades`).

use super::ids::{OrderRef, TradeId};
use crate::commission::CommissionScheme;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Created,
    Open,
    Closed,
}

/// One leg applied to a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub order: OrderRef,
    pub size: f64,
    pub price: f64,
    pub commission: f64,
    pub bar: usize,
    pub dt: NaiveDateTime,
}

/// History entry recorded on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub order: OrderRef,
    pub status: TradeStatus,
    pub size: f64,
    pub price: f64,
    pub commission: f64,
    pub pnl: f64,
    pub dt: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub reference: u64,
    pub symbol: String,
    pub trade_id: TradeId,
    pub status: TradeStatus,
    pub size: f64,
    /// Weighted average entry price of the opening legs.
    pub price: f64,
    pub value: f64,
    /// Cumulative commission of every leg.
    pub commission: f64,
    /// Gross realized profit.
    pub pnl: f64,
    /// Realized profit net of commission.
    pub pnlcomm: f64,
    pub long: bool,
    pub justopened: bool,
    pub is_open: bool,
    pub is_closed: bool,
    pub bar_open: usize,
    pub dt_open: Option<NaiveDateTime>,
    pub bar_close: usize,
    pub dt_close: Option<NaiveDateTime>,
    pub bar_len: usize,
    pub history: Vec<TradeEvent>,
}

impl Trade {
    pub fn new(reference: u64, symbol: impl Into<String>, trade_id: TradeId) -> Self {
        Self {
            reference,
            symbol: symbol.into(),
            trade_id,
            status: TradeStatus::Created,
            size: 0.0,
            price: 0.0,
            value: 0.0,
            commission: 0.0,
            pnl: 0.0,
            pnlcomm: 0.0,
            long: false,
            justopened: false,
            is_open: false,
            is_closed: false,
            bar_open: 0,
            dt_open: None,
            bar_close: 0,
            dt_close: None,
            bar_len: 0,
            history: Vec::new(),
        }
    }

    /// Apply one leg. Growth re-averages the entry price; reduction realizes
    /// profit against the current entry price.
    pub fn update(&mut self, fill: &TradeFill, scheme: &CommissionScheme) {
        if fill.size == 0.0 {
            return;
        }
        self.commission += fill.commission;

        let old = self.size;
        self.size += fill.size;

        self.justopened = old == 0.0;
        if self.justopened {
            self.bar_open = fill.bar;
            self.dt_open = Some(fill.dt);
            self.long = self.size > 0.0;
        }

        self.is_closed = self.size == 0.0;
        if self.is_closed {
            self.is_open = false;
            self.bar_close = fill.bar;
            self.dt_close = Some(fill.dt);
            self.status = TradeStatus::Closed;
        } else {
            self.is_open = true;
            self.status = TradeStatus::Open;
        }
        self.bar_len = fill.bar.saturating_sub(self.bar_open);

        let pnl = if self.size.abs() > old.abs() {
            self.price = (old * self.price + fill.size * fill.price) / self.size;
            0.0
        } else {
            scheme.profit_and_loss(-fill.size, self.price, fill.price)
        };

        self.pnl += pnl;
        self.pnlcomm = self.pnl - self.commission;
        self.value = scheme.value_size(self.size, self.price);

        self.history.push(TradeEvent {
            order: fill.order,
            status: self.status,
            size: fill.size,
            price: fill.price,
            commission: fill.commission,
            pnl,
            dt: fill.dt,
        });
    }

    /// Refresh the bar count of an open trade.
    pub fn tick(&mut self, bar: usize) {
        self.justopened = false;
        if self.is_open {
            self.bar_len = bar.saturating_sub(self.bar_open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommissionSettings;
    use chrono::NaiveDate;

    fn leg(size: f64, price: f64, commission: f64, bar: usize) -> TradeFill {
        TradeFill {
            order: OrderRef(1),
            size,
            price,
            commission,
            bar,
            dt: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn open_grow_close_lifecycle() {
        let scheme = CommissionScheme::new(&CommissionSettings::default());
        let mut trade = Trade::new(1, "SPY", 0);

        trade.update(&leg(10.0, 100.0, 1.0, 0), &scheme);
        assert!(trade.justopened);
        assert!(trade.is_open);
        assert!(trade.long);

        trade.update(&leg(10.0, 110.0, 1.0, 2), &scheme);
        assert!(!trade.justopened);
        assert_eq!(trade.size, 20.0);
        assert!((trade.price - 105.0).abs() < 1e-9);
        assert_eq!(trade.pnl, 0.0);

        trade.update(&leg(-20.0, 120.0, 2.0, 5), &scheme);
        assert!(trade.is_closed);
        assert!(!trade.is_open);
        assert_eq!(trade.status, TradeStatus::Closed);
        assert!((trade.pnl - 300.0).abs() < 1e-9);
        assert!((trade.pnlcomm - 296.0).abs() < 1e-9);
        assert_eq!(trade.bar_len, 5);
        assert_eq!(trade.history.len(), 3);
    }

    #[test]
    fn short_trade_pnl_uses_multiplier() {
        let scheme = CommissionScheme::new(
            &CommissionSettings::default().with_margin(10.0).with_mult(10.0),
        );
        let mut trade = Trade::new(1, "ES", 0);
        trade.update(&leg(-2.0, 50.0, 0.0, 0), &scheme);
        assert!(!trade.long);
        trade.update(&leg(1.0, 45.0, 0.0, 1), &scheme);
        // closing 1 of 2 short at 45 from 50, x10
        assert!((trade.pnl - 50.0).abs() < 1e-9);
        assert!(trade.is_open);
        assert_eq!(trade.value, 10.0);
    }

    #[test]
    fn tick_counts_bars_while_open() {
        let scheme = CommissionScheme::default();
        let mut trade = Trade::new(1, "SPY", 0);
        trade.update(&leg(1.0, 10.0, 0.0, 3), &scheme);
        trade.tick(7);
        assert_eq!(trade.bar_len, 4);
        assert!(!trade.justopened);
    }
}
