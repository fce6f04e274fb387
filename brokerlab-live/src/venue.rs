//! Venue message vocabulary and the client seam.
//!
//! Inbound messages mirror what a venue connection delivers asynchronously:
//! order status changes, open-order state announcements, executions,
//! commission reports, order errors and account updates. Outbound traffic goes
//! through [`VenueClient`].

use brokerlab_core::broker::{BracketLeg, BrokerError};
use brokerlab_core::domain::Side;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::translate::VenueOrder;

/// Venue-assigned order id.
pub type VenueOrderId = u64;

pub type VenueResult<T> = Result<T, VenueError>;

/// Errors raised by a venue client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String, code: Option<i32> },

    #[error("order not found: {0}")]
    OrderNotFound(VenueOrderId),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

impl From<VenueError> for BrokerError {
    fn from(err: VenueError) -> Self {
        BrokerError::Venue(err.to_string())
    }
}

/// Order status as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    PendingCancel,
    Cancelled,
    Expired,
    Inactive,
    Filled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusMsg {
    pub order_id: VenueOrderId,
    pub status: VenueStatus,
    /// Cumulative filled quantity.
    pub filled: f64,
}

/// Open-order state announcement. A cancel-side state seen here precedes
/// the cancellation of an expiring order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderMsg {
    pub order_id: VenueOrderId,
    pub status: VenueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMsg {
    pub exec_id: String,
    pub order_id: VenueOrderId,
    pub side: Side,
    /// Unsigned quantity of this fill.
    pub shares: f64,
    pub price: f64,
    /// Cumulative quantity filled on the order, this fill included.
    pub cum_qty: f64,
    pub time: NaiveDateTime,
    /// Which bracket leg filled, for fills reported on the parent's id.
    pub leg: Option<BracketLeg>,
    /// Commission carried inline; when absent a [`CommissionReportMsg`] follows.
    pub commission: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionReportMsg {
    pub exec_id: String,
    pub commission: f64,
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderErrorMsg {
    pub order_id: VenueOrderId,
    pub code: i32,
    pub message: String,
}

impl OrderErrorMsg {
    /// Order cancelled.
    pub const CANCELLED: i32 = 202;
    /// Order rejected.
    pub const REJECTED: i32 = 201;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub cash: f64,
    pub value: f64,
}

/// An open position held at the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    /// Signed size.
    pub size: f64,
    pub price: f64,
}

/// One inbound venue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VenueEvent {
    Status(OrderStatusMsg),
    OpenOrder(OpenOrderMsg),
    Execution(ExecutionMsg),
    Commission(CommissionReportMsg),
    Error(OrderErrorMsg),
    Account(AccountUpdate),
}

/// Outbound side of a venue connection.
///
/// Calls must not block on venue acknowledgement: confirmations arrive later
/// as [`VenueEvent`]s.
pub trait VenueClient: Send + Sync {
    /// Place one or more orders in a single request. A bracket is always
    /// placed as one call carrying parent, stop side and take side.
    fn place_orders(&self, orders: &[VenueOrder]) -> VenueResult<()>;

    fn cancel_order(&self, order_id: VenueOrderId) -> VenueResult<()>;

    fn positions(&self) -> VenueResult<Vec<VenuePosition>>;

    fn account(&self) -> VenueResult<AccountUpdate>;
}
