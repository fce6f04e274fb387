use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-local order reference. Unique per broker instance, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderRef(pub u64);

impl From<u64> for OrderRef {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One-cancels-other group identifier.
///
/// Every submitted order belongs to exactly one group. A standalone order gets
/// a fresh group of its own; an order submitted with an `oco` sibling inherits
/// the sibling's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OcoGroupId(pub u64);

impl fmt::Display for OcoGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oco-{}", self.0)
    }
}

/// User-supplied trade identifier. Orders with different trade ids on the same
/// instrument feed different trades.
pub type TradeId = u32;

/// Strategy identifier carried by orders as their owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub String);

impl StrategyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic allocator for order references and OCO group ids.
///
/// Owned by a broker so that references are unique within one run without any
/// process-global counter.
#[derive(Debug, Clone)]
pub struct RefAllocator {
    next_order: u64,
    next_group: u64,
}

impl RefAllocator {
    pub fn new() -> Self {
        Self {
            next_order: 1,
            next_group: 1,
        }
    }

    pub fn next_order(&mut self) -> OrderRef {
        let id = OrderRef(self.next_order);
        self.next_order += 1;
        id
    }

    pub fn next_group(&mut self) -> OcoGroupId {
        let id = OcoGroupId(self.next_group);
        self.next_group += 1;
        id
    }
}

impl Default for RefAllocator {
    fn default() -> Self {
        Self::new()
    }
}
