//! BrokerLab Live: the [`Broker`](brokerlab_core::Broker) contract over an
//! asynchronous venue connection.
//!
//! - [`venue`]: inbound message vocabulary and the outbound [`VenueClient`] seam
//! - [`translate`]: order → venue payload translation
//! - [`context`]: connection-scoped ids and OCA groups
//! - [`book`]: the lock-guarded order book every venue event is applied to
//! - [`pump`]: per-event-type channels drained by one consumer task
//! - [`LiveBroker`]: the strategy-facing adapter

pub mod book;
pub mod broker;
pub mod config;
pub mod context;
pub mod pump;
pub mod translate;
pub mod venue;

pub use book::LiveBook;
pub use broker::LiveBroker;
pub use config::LiveConfig;
pub use context::VenueContext;
pub use pump::{channels, EventPump, VenueSenders};
pub use translate::{translate, VenueOrder, VenueOrderType};
pub use venue::{VenueClient, VenueError, VenueEvent, VenueOrderId};
