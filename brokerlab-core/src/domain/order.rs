//! Order: intent, lifecycle status and execution ledger.
//!
//! Status machine:
//!
//! ```text
//! Created → Submitted → Accepted ⇄ Partial → Completed
//!                 └──────────┴────────┴──→ Cancelled | Expired | Margin | Rejected
//! ```
//!
//! Terminal transitions are idempotent: repeating the transition an order is
//! already in returns `Ok(false)` so redelivered venue messages are absorbed.
//! The ledger keeps a cursor separating reported from pending fills; each
//! [`Order::snapshot`] hands out exactly the fills appended since the previous one.

use super::ids::{OcoGroupId, OrderRef, StrategyId, TradeId};
use crate::commission::CommissionScheme;
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors from order lifecycle operations.
#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("invalid transition for order {reference}: {from} → {to}")]
    InvalidTransition {
        reference: OrderRef,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {reference} is not alive (status: {status})")]
    NotAlive {
        reference: OrderRef,
        status: OrderStatus,
    },

    #[error("order {reference} over-filled: execution of {size} exceeds remaining {remaining}")]
    Overfill {
        reference: OrderRef,
        size: f64,
        remaining: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// How and when an order is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecType {
    /// Next available price (next bar open in simulation).
    Market,
    /// Close of the next bar.
    Close,
    /// At `price` or better.
    Limit,
    /// Becomes a market order once `price` is touched.
    Stop,
    /// Becomes a limit order at `price_limit` once `price` is touched.
    StopLimit,
    /// Stop that follows the market by a trail amount or percent.
    StopTrail,
    /// Trailing stop whose limit keeps its original offset to the stop.
    StopTrailLimit,
}

impl ExecType {
    pub fn is_trailing(self) -> bool {
        matches!(self, ExecType::StopTrail | ExecType::StopTrailLimit)
    }

    pub fn is_stop_limit(self) -> bool {
        matches!(self, ExecType::StopLimit | ExecType::StopTrailLimit)
    }
}

/// Validity window of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Validity {
    /// Good till cancelled.
    #[default]
    Gtc,
    /// Valid until the end of the creation day.
    Day,
    /// Valid until the given instant.
    Until { at: NaiveDateTime },
}

impl Validity {
    /// Last valid instant for an order created at `created`.
    pub fn expires_at(self, created: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
        match self {
            Validity::Gtc => None,
            Validity::Day => {
                let end = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)?;
                created.map(|dt| dt.date().and_time(end))
            }
            Validity::Until { at } => Some(at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    Partial,
    Completed,
    Cancelled,
    Expired,
    Margin,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Margin
                | OrderStatus::Rejected
        )
    }

    pub fn is_alive(self) -> bool {
        matches!(
            self,
            OrderStatus::Submitted | OrderStatus::Accepted | OrderStatus::Partial
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Creation record: what was asked for and the market reference at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderData {
    pub dt: Option<NaiveDateTime>,
    /// Signed requested size.
    pub size: f64,
    /// Limit / stop trigger price. Defaults to `pclose` when not given.
    pub price: Option<f64>,
    pub price_limit: Option<f64>,
    pub trail_amount: Option<f64>,
    pub trail_percent: Option<f64>,
    /// Close of the instrument when the order was created.
    pub pclose: f64,
}

/// One fill appended to an order's execution ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionBit {
    pub dt: NaiveDateTime,
    pub size: f64,
    pub price: f64,
    pub closed: f64,
    pub closed_value: f64,
    pub closed_comm: f64,
    pub opened: f64,
    pub opened_value: f64,
    pub opened_comm: f64,
    pub margin: f64,
    pub pnl: f64,
    /// Position size after this fill.
    pub psize: f64,
    /// Position average price after this fill.
    pub pprice: f64,
    /// Order size still unfilled after this fill.
    pub remsize: f64,
}

/// Inputs to [`Order::execute`]. `remsize` is computed by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub dt: NaiveDateTime,
    pub size: f64,
    pub price: f64,
    pub closed: f64,
    pub closed_value: f64,
    pub closed_comm: f64,
    pub opened: f64,
    pub opened_value: f64,
    pub opened_comm: f64,
    pub margin: f64,
    pub pnl: f64,
    pub psize: f64,
    pub pprice: f64,
}

impl Fill {
    /// A fill with no closing or opening apportionment yet.
    pub fn new(dt: NaiveDateTime, size: f64, price: f64) -> Self {
        Self {
            dt,
            size,
            price,
            closed: 0.0,
            closed_value: 0.0,
            closed_comm: 0.0,
            opened: 0.0,
            opened_value: 0.0,
            opened_comm: 0.0,
            margin: 0.0,
            pnl: 0.0,
            psize: 0.0,
            pprice: 0.0,
        }
    }
}

/// Append-only fill history plus cumulative execution figures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionLedger {
    bits: Vec<ExecutionBit>,
    /// Bits handed out by previous snapshots.
    reported: usize,
    /// Pending window carried by a snapshot; `None` on the live order.
    window: Option<(usize, usize)>,

    pub dt: Option<NaiveDateTime>,
    pub size: f64,
    pub price: f64,
    pub value: f64,
    pub comm: f64,
    pub pnl: f64,
    pub margin: f64,
    pub psize: f64,
    pub pprice: f64,
    pub remsize: f64,
}

impl ExecutionLedger {
    fn new(remsize: f64) -> Self {
        Self {
            remsize,
            ..Self::default()
        }
    }

    fn push(&mut self, fill: &Fill) {
        let total = self.size + fill.size;
        if total != 0.0 {
            self.price = (self.size * self.price + fill.size * fill.price) / total;
        }
        self.size = total;
        self.dt = Some(fill.dt);
        self.value += fill.closed_value + fill.opened_value;
        self.comm += fill.closed_comm + fill.opened_comm;
        self.pnl += fill.pnl;
        self.margin = fill.margin;
        self.psize = fill.psize;
        self.pprice = fill.pprice;
        self.remsize -= fill.size;

        self.bits.push(ExecutionBit {
            dt: fill.dt,
            size: fill.size,
            price: fill.price,
            closed: fill.closed,
            closed_value: fill.closed_value,
            closed_comm: fill.closed_comm,
            opened: fill.opened,
            opened_value: fill.opened_value,
            opened_comm: fill.opened_comm,
            margin: fill.margin,
            pnl: fill.pnl,
            psize: fill.psize,
            pprice: fill.pprice,
            remsize: self.remsize,
        });
    }

    /// Full fill history.
    pub fn bits(&self) -> &[ExecutionBit] {
        &self.bits
    }

    /// Fills not yet delivered. On a snapshot: the fills it was created to report.
    pub fn pending(&self) -> &[ExecutionBit] {
        match self.window {
            Some((from, to)) => &self.bits[from..to],
            None => &self.bits[self.reported..],
        }
    }

    /// Close the current pending window and return it.
    fn advance(&mut self) -> (usize, usize) {
        let window = (self.reported, self.bits.len());
        self.reported = self.bits.len();
        window
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub reference: OrderRef,
    pub symbol: String,
    pub side: Side,
    pub exec_type: ExecType,
    pub status: OrderStatus,
    pub owner: Option<StrategyId>,
    pub trade_id: TradeId,
    pub valid: Validity,
    /// Resolved expiry instant (see [`Validity::expires_at`]).
    pub valid_until: Option<NaiveDateTime>,
    /// Bracket parent. `None` for standalone orders and bracket parents.
    pub parent: Option<OrderRef>,
    /// OCO sibling requested at creation.
    pub oco: Option<OrderRef>,
    /// Group assigned on submission.
    pub oco_group: Option<OcoGroupId>,
    pub transmit: bool,
    pub created: OrderData,
    pub executed: ExecutionLedger,
    pub commission: CommissionScheme,
    /// Venue-specific keyword arguments.
    pub info: Map<String, Value>,
    /// Bracket child waiting for its parent to complete.
    pub dormant: bool,
    /// Stop-limit variants: the stop price has been touched.
    pub triggered: bool,
    /// `StopTrailLimit`: distance between stop and limit at creation.
    pub limit_offset: f64,
}

impl Order {
    /// New order in `Created` status. `size` is unsigned; the side gives the sign.
    pub fn new(
        reference: OrderRef,
        symbol: impl Into<String>,
        side: Side,
        size: f64,
        exec_type: ExecType,
    ) -> Self {
        let signed = side.sign() * size.abs();
        Self {
            reference,
            symbol: symbol.into(),
            side,
            exec_type,
            status: OrderStatus::Created,
            owner: None,
            trade_id: 0,
            valid: Validity::Gtc,
            valid_until: None,
            parent: None,
            oco: None,
            oco_group: None,
            transmit: true,
            created: OrderData {
                dt: None,
                size: signed,
                price: None,
                price_limit: None,
                trail_amount: None,
                trail_percent: None,
                pclose: 0.0,
            },
            executed: ExecutionLedger::new(signed),
            commission: CommissionScheme::default(),
            info: Map::new(),
            dormant: false,
            triggered: false,
            limit_offset: 0.0,
        }
    }

    /// Stamp the creation time and market reference, resolve validity and
    /// seed trailing stops. Called once by the broker before submission.
    pub fn stamp(&mut self, dt: Option<NaiveDateTime>, pclose: f64) {
        self.created.dt = dt;
        self.created.pclose = pclose;
        self.valid_until = self.valid.expires_at(dt);
        if self.created.price.is_none() && self.exec_type != ExecType::Market {
            self.created.price = Some(pclose);
        }

        if self.exec_type.is_trailing() {
            let price = self.created.price.unwrap_or(pclose);
            self.limit_offset = price - self.created.price_limit.unwrap_or(price);
            self.created.price = Some(match self.side {
                Side::Buy => f64::INFINITY,
                Side::Sell => f64::NEG_INFINITY,
            });
            self.trail_adjust(price);
        }
    }

    pub fn size(&self) -> f64 {
        self.created.size
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn alive(&self) -> bool {
        self.status.is_alive()
    }

    /// Eligible for matching: not a dormant bracket child.
    pub fn is_active(&self) -> bool {
        !self.dormant
    }

    pub fn activate(&mut self) {
        self.dormant = false;
    }

    /// Whether the order's validity has elapsed at `now`. Market orders never expire.
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        if self.exec_type == ExecType::Market {
            return false;
        }
        self.valid_until.is_some_and(|until| now > until)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    fn transition(&mut self, to: OrderStatus) -> Result<bool, OrderError> {
        if self.status == to {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                reference: self.reference,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(true)
    }

    /// Created → Submitted.
    pub fn submit(&mut self) -> Result<bool, OrderError> {
        match self.status {
            OrderStatus::Created | OrderStatus::Submitted => self.transition(OrderStatus::Submitted),
            from => Err(OrderError::InvalidTransition {
                reference: self.reference,
                from,
                to: OrderStatus::Submitted,
            }),
        }
    }

    /// → Accepted. A duplicate accept, or a late one on a partially filled
    /// order, is a no-op.
    pub fn accept(&mut self) -> Result<bool, OrderError> {
        if self.status == OrderStatus::Partial {
            return Ok(false);
        }
        self.transition(OrderStatus::Accepted)
    }

    pub fn partial(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Partial)
    }

    pub fn completed(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn expire(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Expired)
    }

    pub fn reject(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Rejected)
    }

    pub fn margin(&mut self) -> Result<bool, OrderError> {
        self.transition(OrderStatus::Margin)
    }

    /// Append one fill to the ledger. The caller follows up with
    /// [`Order::partial`] or [`Order::completed`] depending on [`Order::is_filled`].
    pub fn execute(&mut self, fill: &Fill) -> Result<(), OrderError> {
        if !self.alive() {
            return Err(OrderError::NotAlive {
                reference: self.reference,
                status: self.status,
            });
        }
        if fill.size == 0.0 {
            return Ok(());
        }
        let remaining = self.executed.remsize;
        if fill.size.signum() != remaining.signum() || fill.size.abs() > remaining.abs() + 1e-9 {
            return Err(OrderError::Overfill {
                reference: self.reference,
                size: fill.size,
                remaining,
            });
        }
        self.executed.push(fill);
        if self.executed.remsize.abs() < 1e-9 {
            self.executed.remsize = 0.0;
        }
        Ok(())
    }

    pub fn is_filled(&self) -> bool {
        self.executed.remsize == 0.0
    }

    /// Fills appended since the previous snapshot (see [`ExecutionLedger::pending`]).
    pub fn pending_executions(&self) -> &[ExecutionBit] {
        self.executed.pending()
    }

    /// Clone for notification. The clone reports the fills appended since the
    /// previous snapshot; the cursor on `self` advances past them.
    pub fn snapshot(&mut self) -> Order {
        let window = self.executed.advance();
        let mut snap = self.clone();
        snap.executed.window = Some(window);
        snap
    }

    // ── Trailing stops ─────────────────────────────────────────────────

    /// Ratchet a trailing stop toward `price`, never away from the market.
    pub fn trail_adjust(&mut self, price: f64) {
        let amount = match (self.created.trail_amount, self.created.trail_percent) {
            (Some(amount), _) if amount != 0.0 => amount,
            (_, Some(percent)) if percent != 0.0 => price * percent,
            _ => 0.0,
        };
        let current = self.created.price.unwrap_or(price);
        let candidate = match self.side {
            Side::Buy => price + amount,
            Side::Sell => price - amount,
        };
        let tighter = match self.side {
            Side::Buy => candidate < current,
            Side::Sell => candidate > current,
        };
        if tighter {
            self.created.price = Some(candidate);
            if self.exec_type == ExecType::StopTrailLimit {
                self.created.price_limit = Some(candidate - self.limit_offset);
            }
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {:?} {} {} [{}]",
            self.reference, self.side, self.exec_type, self.created.size, self.symbol, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn make_order(side: Side, size: f64) -> Order {
        let mut order = Order::new(OrderRef(1), "SPY", side, size, ExecType::Market);
        order.submit().unwrap();
        order.accept().unwrap();
        order
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn signed_size_follows_side() {
        assert_eq!(make_order(Side::Buy, 10.0).size(), 10.0);
        assert_eq!(make_order(Side::Sell, 10.0).size(), -10.0);
    }

    #[test]
    fn duplicate_accept_is_noop() {
        let mut order = make_order(Side::Buy, 10.0);
        assert_eq!(order.accept(), Ok(false));
        assert_eq!(order.status, OrderStatus::Accepted);
    }

    #[test]
    fn late_accept_keeps_partial_status() {
        let mut order = make_order(Side::Buy, 10.0);
        order.execute(&Fill::new(dt(1), 4.0, 5.0)).unwrap();
        order.partial().unwrap();
        assert_eq!(order.accept(), Ok(false));
        assert_eq!(order.status, OrderStatus::Partial);
    }

    #[test]
    fn cancel_twice_is_noop() {
        let mut order = make_order(Side::Buy, 10.0);
        assert_eq!(order.cancel(), Ok(true));
        let before = order.clone();
        assert_eq!(order.cancel(), Ok(false));
        assert_eq!(order, before);
    }

    #[test]
    fn terminal_to_other_terminal_is_rejected() {
        let mut order = make_order(Side::Buy, 10.0);
        order.expire().unwrap();
        assert!(matches!(
            order.cancel(),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert_eq!(order.status, OrderStatus::Expired);
    }

    #[test]
    fn alive_states() {
        let mut order = Order::new(OrderRef(1), "SPY", Side::Buy, 1.0, ExecType::Market);
        assert!(!order.alive());
        order.submit().unwrap();
        assert!(order.alive());
        order.accept().unwrap();
        order.partial().unwrap();
        assert!(order.alive());
        order.completed().unwrap();
        assert!(!order.alive());
    }

    // ── Execution ledger ───────────────────────────────────────────────

    #[test]
    fn execute_reduces_remaining_and_fills() {
        let mut order = make_order(Side::Sell, 30.0);
        order.execute(&Fill::new(dt(1), -10.0, 5.0)).unwrap();
        assert_eq!(order.executed.remsize, -20.0);
        assert!(!order.is_filled());
        order.execute(&Fill::new(dt(1), -20.0, 6.0)).unwrap();
        assert!(order.is_filled());
        assert_eq!(order.executed.size, -30.0);
        assert!((order.executed.price - (50.0 + 120.0) / 30.0).abs() < 1e-9);
    }

    #[test]
    fn execute_after_terminal_fails() {
        let mut order = make_order(Side::Buy, 10.0);
        order.cancel().unwrap();
        assert!(matches!(
            order.execute(&Fill::new(dt(1), 5.0, 1.0)),
            Err(OrderError::NotAlive { .. })
        ));
        assert!(order.executed.bits().is_empty());
    }

    #[test]
    fn overfill_is_rejected() {
        let mut order = make_order(Side::Buy, 10.0);
        assert!(matches!(
            order.execute(&Fill::new(dt(1), 11.0, 1.0)),
            Err(OrderError::Overfill { .. })
        ));
        assert!(matches!(
            order.execute(&Fill::new(dt(1), -1.0, 1.0)),
            Err(OrderError::Overfill { .. })
        ));
    }

    #[test]
    fn snapshots_report_each_fill_once() {
        let mut order = make_order(Side::Buy, 100.0);
        order.execute(&Fill::new(dt(1), 10.0, 1.0)).unwrap();
        order.execute(&Fill::new(dt(1), 20.0, 1.1)).unwrap();

        let first = order.snapshot();
        let pending: Vec<(f64, f64)> = first
            .pending_executions()
            .iter()
            .map(|b| (b.size, b.price))
            .collect();
        assert_eq!(pending, vec![(10.0, 1.0), (20.0, 1.1)]);
        assert!(order.pending_executions().is_empty());

        order.execute(&Fill::new(dt(2), 30.0, 1.2)).unwrap();
        order.execute(&Fill::new(dt(2), 40.0, 1.3)).unwrap();

        let second = order.snapshot();
        let pending: Vec<(f64, f64)> = second
            .pending_executions()
            .iter()
            .map(|b| (b.size, b.price))
            .collect();
        assert_eq!(pending, vec![(30.0, 1.2), (40.0, 1.3)]);
        // Earlier snapshot still reports its own window.
        assert_eq!(first.pending_executions().len(), 2);
        assert_eq!(second.executed.bits().len(), 4);
    }

    #[test]
    fn snapshot_without_fills_is_empty() {
        let mut order = make_order(Side::Buy, 1.0);
        assert!(order.snapshot().pending_executions().is_empty());
    }

    // ── Validity and trailing ──────────────────────────────────────────

    #[test]
    fn day_validity_expires_next_day() {
        let mut order = Order::new(OrderRef(1), "SPY", Side::Buy, 1.0, ExecType::Limit);
        order.valid = Validity::Day;
        order.stamp(Some(dt(4)), 100.0);
        assert!(!order.is_expired_at(dt(4)));
        assert!(order.is_expired_at(dt(5)));
    }

    #[test]
    fn market_orders_never_expire() {
        let mut order = Order::new(OrderRef(1), "SPY", Side::Buy, 1.0, ExecType::Market);
        order.valid = Validity::Until { at: dt(1) };
        order.stamp(Some(dt(1)), 100.0);
        assert!(!order.is_expired_at(dt(20)));
    }

    #[test]
    fn sell_trailing_stop_only_ratchets_up() {
        let mut order = Order::new(OrderRef(1), "SPY", Side::Sell, 1.0, ExecType::StopTrail);
        order.created.trail_amount = Some(2.0);
        order.stamp(Some(dt(1)), 100.0);
        assert_eq!(order.created.price, Some(98.0));

        order.trail_adjust(105.0);
        assert_eq!(order.created.price, Some(103.0));
        order.trail_adjust(101.0);
        assert_eq!(order.created.price, Some(103.0));
    }

    #[test]
    fn buy_trail_limit_keeps_offset() {
        let mut order = Order::new(OrderRef(1), "SPY", Side::Buy, 1.0, ExecType::StopTrailLimit);
        order.created.trail_percent = Some(0.1);
        order.created.price = Some(100.0);
        order.created.price_limit = Some(99.0);
        order.stamp(Some(dt(1)), 100.0);
        assert!((order.created.price.unwrap() - 110.0).abs() < 1e-9);
        assert!((order.created.price_limit.unwrap() - 109.0).abs() < 1e-9);

        order.trail_adjust(90.0);
        assert!((order.created.price.unwrap() - 99.0).abs() < 1e-9);
        assert!((order.created.price_limit.unwrap() - 98.0).abs() < 1e-9);
    }

    #[test]
    fn order_serialization_roundtrip() {
        let mut order = make_order(Side::Buy, 5.0);
        order.info.insert("tif".into(), Value::from("GTC"));
        order.execute(&Fill::new(dt(1), 5.0, 10.0)).unwrap();
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }
}
