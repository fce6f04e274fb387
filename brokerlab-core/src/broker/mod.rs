//! Broker contract shared by the simulated broker and live venue adapters.
//!
//! Strategies talk to a [`Broker`] through [`OrderRequest`]s and read back
//! order, trade and fund notifications once per cycle through
//! [`Broker::get_notification`]. Every implementation keeps positions through
//! [`Position::update`](crate::domain::Position::update), apportions commission
//! through a [`CommissionScheme`], and resolves brackets and OCO groups through
//! the [`BracketManager`].

pub mod bracket;
pub mod notification;
pub mod simulated;
pub mod slippage;
pub mod trades;

pub use bracket::{
    BracketAction, BracketGroup, BracketLeg, BracketManager, BracketOrders, BracketRequest, Staging,
};
pub use notification::{
    dispatch_cycle, FundSnapshot, Notification, NotificationQueue, NotificationSink,
};
pub use simulated::SimulatedBroker;
pub use trades::TradeBook;

use crate::commission::{CommissionScheme, CommissionSettings};
use crate::domain::{
    ExecType, Order, OrderError, OrderRef, OrderStatus, Position, Side, StrategyId, TradeId,
    Validity,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("order {0} not found")]
    UnknownOrder(OrderRef),

    #[error("order {0} was already submitted")]
    DuplicateSubmit(OrderRef),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("venue error: {0}")]
    Venue(String),
}

/// Everything a strategy can ask for when placing an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    /// Unsigned size; the side is given by `buy`/`sell`.
    pub size: f64,
    pub price: Option<f64>,
    pub price_limit: Option<f64>,
    pub exec_type: ExecType,
    pub valid: Validity,
    pub trade_id: TradeId,
    pub oco: Option<OrderRef>,
    pub trail_amount: Option<f64>,
    pub trail_percent: Option<f64>,
    pub parent: Option<OrderRef>,
    pub transmit: bool,
    pub owner: Option<StrategyId>,
    /// Venue-specific keyword arguments, carried untouched on the order.
    pub info: Map<String, Value>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, size: f64) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            price: None,
            price_limit: None,
            exec_type: ExecType::Market,
            valid: Validity::Gtc,
            trade_id: 0,
            oco: None,
            trail_amount: None,
            trail_percent: None,
            parent: None,
            transmit: true,
            owner: None,
            info: Map::new(),
        }
    }

    pub fn close(symbol: impl Into<String>, size: f64) -> Self {
        Self::market(symbol, size).with_exec_type(ExecType::Close)
    }

    pub fn limit(symbol: impl Into<String>, size: f64, price: f64) -> Self {
        Self::market(symbol, size)
            .with_exec_type(ExecType::Limit)
            .with_price(price)
    }

    pub fn stop(symbol: impl Into<String>, size: f64, price: f64) -> Self {
        Self::market(symbol, size)
            .with_exec_type(ExecType::Stop)
            .with_price(price)
    }

    pub fn stop_limit(symbol: impl Into<String>, size: f64, price: f64, limit: f64) -> Self {
        let mut req = Self::stop(symbol, size, price).with_exec_type(ExecType::StopLimit);
        req.price_limit = Some(limit);
        req
    }

    pub fn with_exec_type(mut self, exec_type: ExecType) -> Self {
        self.exec_type = exec_type;
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_price_limit(mut self, price_limit: f64) -> Self {
        self.price_limit = Some(price_limit);
        self
    }

    pub fn with_valid(mut self, valid: Validity) -> Self {
        self.valid = valid;
        self
    }

    pub fn with_trade_id(mut self, trade_id: TradeId) -> Self {
        self.trade_id = trade_id;
        self
    }

    pub fn with_oco(mut self, sibling: OrderRef) -> Self {
        self.oco = Some(sibling);
        self
    }

    pub fn with_trail_amount(mut self, amount: f64) -> Self {
        self.trail_amount = Some(amount);
        self
    }

    pub fn with_trail_percent(mut self, percent: f64) -> Self {
        self.trail_percent = Some(percent);
        self
    }

    pub fn with_parent(mut self, parent: OrderRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn with_owner(mut self, owner: StrategyId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Build an unstamped `Created` order. Brokers stamp creation time, market
    /// reference and commission scheme afterwards.
    pub fn into_order(self, reference: OrderRef, side: Side) -> Order {
        let mut order = Order::new(reference, self.symbol, side, self.size, self.exec_type);
        order.created.price = self.price;
        order.created.price_limit = self.price_limit;
        order.created.trail_amount = self.trail_amount;
        order.created.trail_percent = self.trail_percent;
        order.valid = self.valid;
        order.trade_id = self.trade_id;
        order.oco = self.oco;
        order.parent = self.parent;
        order.dormant = self.parent.is_some();
        order.transmit = self.transmit;
        order.owner = self.owner;
        order.info = self.info;
        order
    }
}

/// The contract every execution venue implements.
pub trait Broker {
    /// Allocate a reference and stamp a new `Created` order without submitting it.
    fn create_order(&mut self, side: Side, request: OrderRequest) -> Order;

    /// Submit an order created by [`Broker::create_order`]. Returns the order
    /// as stored after submission.
    fn submit(&mut self, order: Order) -> Result<Order, BrokerError>;

    /// Request cancellation. `Ok(false)` when the order is no longer cancellable.
    fn cancel(&mut self, reference: OrderRef) -> Result<bool, BrokerError>;

    fn buy(&mut self, request: OrderRequest) -> Result<Order, BrokerError> {
        let order = self.create_order(Side::Buy, request);
        self.submit(order)
    }

    fn sell(&mut self, request: OrderRequest) -> Result<Order, BrokerError> {
        let order = self.create_order(Side::Sell, request);
        self.submit(order)
    }

    fn order(&self, reference: OrderRef) -> Option<Order>;

    fn order_status(&self, reference: OrderRef) -> Option<OrderStatus> {
        self.order(reference).map(|o| o.status)
    }

    /// Position snapshot; flat if the instrument was never traded.
    fn position(&self, symbol: &str) -> Position;

    fn cash(&self) -> f64;

    /// Account value, or the value of the listed instruments' positions only.
    fn value(&self, symbols: Option<&[&str]>) -> f64;

    /// Close the current notification cycle.
    fn next(&mut self) -> Result<(), BrokerError>;

    /// Enqueue a snapshot of the order (and the trade updates its new fills produce).
    fn notify(&mut self, reference: OrderRef);

    /// Non-blocking dequeue. `None` means the channel is momentarily empty.
    fn get_notification(&mut self) -> Option<Notification>;

    fn commission_scheme(&self, symbol: &str) -> CommissionScheme;

    /// Install a commission scheme; `settings.name == None` replaces the default.
    fn set_commission(&mut self, settings: &CommissionSettings);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builds_dormant_child() {
        let order = OrderRequest::limit("SPY", 5.0, 101.0)
            .with_parent(OrderRef(3))
            .with_transmit(false)
            .with_info("account", "DU123")
            .into_order(OrderRef(4), Side::Sell);
        assert_eq!(order.size(), -5.0);
        assert!(order.dormant);
        assert!(!order.transmit);
        assert_eq!(order.created.price, Some(101.0));
        assert_eq!(order.info["account"], "DU123");
    }

    #[test]
    fn stop_limit_request_carries_both_prices() {
        let req = OrderRequest::stop_limit("ES", 1.0, 10.0, 10.5);
        assert_eq!(req.exec_type, ExecType::StopLimit);
        assert_eq!(req.price, Some(10.0));
        assert_eq!(req.price_limit, Some(10.5));
    }
}
