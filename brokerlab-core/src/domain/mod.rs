//! Domain types for brokerlab

pub mod bar;
pub mod ids;
pub mod order;
pub mod position;
pub mod trade;

pub use bar::Bar;
pub use ids::{OcoGroupId, OrderRef, RefAllocator, StrategyId, TradeId};
pub use order::{
    ExecType, ExecutionBit, ExecutionLedger, Fill, Order, OrderData, OrderError, OrderStatus,
    Side, Validity,
};
pub use position::{Position, PositionUpdate};
pub use trade::{Trade, TradeEvent, TradeFill, TradeStatus};

/// Symbol type alias
pub type Symbol = String;
