//! BrokerLab Core: order lifecycle, position and trade accounting, commission
//! model, and the bar-driven simulated broker.
//!
//! - Domain types (bars, orders with execution ledgers, positions, trades)
//! - Commission schemes for notional (stock-like) and margin (futures-like) instruments
//! - The [`Broker`] contract with bracket and OCO handling
//! - [`SimulatedBroker`]: order matching against OHLC bars with slippage,
//!   margin checks, mark-to-market, credit interest and fund accounting
//! - Per-cycle notification channel

pub mod broker;
pub mod commission;
pub mod config;
pub mod domain;
pub mod logging;

pub use broker::{Broker, BrokerError, Notification, OrderRequest, SimulatedBroker};
pub use commission::{CommissionScheme, CommissionSettings};
pub use config::{BrokerConfig, ConfigError};
