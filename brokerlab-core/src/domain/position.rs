//! Position: per-instrument size and average entry price.
//!
//! A position is mutated only through [`Position::update`], which every broker
//! shares. The returned [`PositionUpdate`] splits a fill into its closing and
//! opening legs so callers can apportion commission, value and cash.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Result of applying one fill to a position.
///
/// `opened` and `closed` carry the sign of the fill: a sell that closes a long
/// reports a negative `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub size: f64,
    pub price: f64,
    pub opened: f64,
    pub closed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub size: f64,
    /// Average entry price. Retained as the last value when the position goes flat.
    pub price: f64,
    /// Average price before the most recent update.
    pub price_orig: f64,
    /// Mark-to-market base for margin instruments; `None` until first marked.
    pub adjbase: Option<f64>,
    /// Timestamp of the last fill or interest accrual.
    pub updated_at: Option<NaiveDateTime>,
}

impl Position {
    pub fn new(size: f64, price: f64) -> Self {
        Self {
            size,
            price: if size != 0.0 { price } else { 0.0 },
            price_orig: 0.0,
            adjbase: None,
            updated_at: None,
        }
    }

    pub fn flat() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.size < 0.0
    }

    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    /// Apply a signed fill of `delta` units at `price`.
    pub fn update(&mut self, delta: f64, price: f64) -> PositionUpdate {
        let old = self.size;
        self.price_orig = self.price;
        self.size += delta;

        let (opened, closed) = if self.size == 0.0 {
            (0.0, delta)
        } else if old == 0.0 {
            self.price = price;
            (delta, 0.0)
        } else if old.signum() == delta.signum() {
            self.price = (self.price * old + delta * price) / self.size;
            (delta, 0.0)
        } else if old.signum() == self.size.signum() {
            (0.0, delta)
        } else {
            // Reversal: the whole prior position closes, the remainder opens at the fill.
            self.price = price;
            (self.size, -old)
        };

        PositionUpdate {
            size: self.size,
            price: self.price,
            opened,
            closed,
        }
    }

    /// Preview an update on a copy, leaving `self` untouched.
    pub fn pseudo_update(&self, delta: f64, price: f64) -> PositionUpdate {
        self.clone().update(delta, price)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}
