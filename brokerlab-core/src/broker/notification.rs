//! Notification channel between a broker and the strategy that owns its orders.
//!
//! Notifications are delivered in the order they were enqueued. A
//! [`Notification::Boundary`] marks the end of each broker cycle so a consumer
//! can tell "no more this cycle" apart from "momentarily empty".

use super::Broker;
use crate::domain::{Order, Trade};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fund accounting figures reported once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub cash: f64,
    pub value: f64,
    pub fund_value: f64,
    pub fund_shares: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    Order(Order),
    Trade(Trade),
    Fund(FundSnapshot),
    Boundary,
}

/// FIFO of notifications.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    queue: VecDeque<Notification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    pub fn boundary(&mut self) {
        self.queue.push_back(Notification::Boundary);
    }

    pub fn pop(&mut self) -> Option<Notification> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Strategy-side callbacks.
pub trait NotificationSink {
    fn notify_order(&mut self, order: &Order);

    fn notify_trade(&mut self, _trade: &Trade) {}

    fn notify_fund(&mut self, _fund: &FundSnapshot) {}
}

/// Drain one cycle of notifications into `sink`, stopping after the boundary
/// marker (consumed) or when the channel is empty. Returns how many order,
/// trade and fund notifications were delivered.
pub fn dispatch_cycle<B, S>(broker: &mut B, sink: &mut S) -> usize
where
    B: Broker + ?Sized,
    S: NotificationSink + ?Sized,
{
    let mut delivered = 0;
    while let Some(notification) = broker.get_notification() {
        match notification {
            Notification::Boundary => break,
            Notification::Order(order) => sink.notify_order(&order),
            Notification::Trade(trade) => sink.notify_trade(&trade),
            Notification::Fund(fund) => sink.notify_fund(&fund),
        }
        delivered += 1;
    }
    delivered
}
