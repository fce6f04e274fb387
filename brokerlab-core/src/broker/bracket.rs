//! Bracket and OCO bookkeeping shared by every broker.
//!
//! Orders submitted with `transmit = false` are held in a buffer keyed by the
//! parent reference until an order of the same group arrives with
//! `transmit = true`; the whole group is then released at once. Released
//! parent/children triples are tracked as a [`BracketGroup`]:
//! - parent completes → children activate (no re-submission);
//! - a child completes → the other children are cancelled (a child fill
//!   implies the parent filled, even if that fill is still in flight);
//! - any member is cancelled, rejected, expired or refused for margin →
//!   remaining members are cancelled.
//!
//! OCO groups are independent of brackets: any execution or terminal state of
//! one member cancels the other members.
//!
//! The manager only decides; brokers apply the returned [`BracketAction`]s.

use super::{Broker, BrokerError, OrderRequest};
use crate::domain::{ExecType, OcoGroupId, Order, OrderRef, RefAllocator, Side};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of staging an order for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staging {
    /// Buffered until the group's transmitting order arrives.
    Hold,
    /// Release these orders, parent first.
    Transmit(Vec<OrderRef>),
    /// Child whose parent is not awaiting transmission; reject it.
    Orphan,
}

/// What the broker must do after a bracket member changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BracketAction {
    Activate(Vec<OrderRef>),
    Cancel(Vec<OrderRef>),
}

/// Which bracket leg a venue fill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketLeg {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketGroup {
    pub parent: OrderRef,
    /// Stop side first, take side last.
    pub children: Vec<OrderRef>,
    /// The parent has completed and the children are live.
    pub activated: bool,
}

impl BracketGroup {
    /// Members still eligible for cancellation, excluding `except`.
    fn others(&self, except: OrderRef) -> Vec<OrderRef> {
        let parent = (!self.activated).then_some(self.parent);
        parent
            .into_iter()
            .chain(self.children.iter().copied())
            .filter(|r| *r != except)
            .collect()
    }

    fn siblings(&self, child: OrderRef) -> Vec<OrderRef> {
        self.children.iter().copied().filter(|r| *r != child).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BracketManager {
    /// Orders awaiting transmission, keyed by the group's parent reference.
    staged: HashMap<OrderRef, Vec<OrderRef>>,
    /// Released brackets keyed by parent reference.
    groups: HashMap<OrderRef, BracketGroup>,
    oco_members: HashMap<OcoGroupId, Vec<OrderRef>>,
    oco_of: HashMap<OrderRef, OcoGroupId>,
}

impl BracketManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Transmission ───────────────────────────────────────────────────

    /// Stage an order. Standalone orders with `transmit = true` are released
    /// immediately on their own.
    pub fn stage(&mut self, reference: OrderRef, parent: Option<OrderRef>, transmit: bool) -> Staging {
        let root = parent.unwrap_or(reference);
        if parent.is_some() && !self.staged.contains_key(&root) {
            return Staging::Orphan;
        }

        let buffer = self.staged.entry(root).or_default();
        buffer.push(reference);
        if !transmit {
            return Staging::Hold;
        }

        let released = self.staged.remove(&root).unwrap_or_default();
        if released.len() > 1 {
            self.groups.insert(
                root,
                BracketGroup {
                    parent: root,
                    children: released[1..].to_vec(),
                    activated: false,
                },
            );
        }
        Staging::Transmit(released)
    }

    pub fn is_staged(&self, reference: OrderRef) -> bool {
        self.staged.values().any(|refs| refs.contains(&reference))
    }

    // ── Bracket resolution ─────────────────────────────────────────────

    /// An order reached `Completed`.
    pub fn on_completed(&mut self, reference: OrderRef, parent: Option<OrderRef>) -> Option<BracketAction> {
        let root = parent.unwrap_or(reference);
        if root == reference {
            let group = self.groups.get_mut(&root)?;
            if group.activated {
                return None;
            }
            group.activated = true;
            return Some(BracketAction::Activate(group.children.clone()));
        }
        let group = self.groups.remove(&root)?;
        Some(BracketAction::Cancel(group.siblings(reference)))
    }

    /// An order reached a terminal state other than `Completed`.
    pub fn on_terminated(&mut self, reference: OrderRef, parent: Option<OrderRef>) -> Option<BracketAction> {
        let root = parent.unwrap_or(reference);
        let group = self.groups.remove(&root)?;
        let others = group.others(reference);
        (!others.is_empty()).then_some(BracketAction::Cancel(others))
    }

    pub fn group(&self, parent: OrderRef) -> Option<&BracketGroup> {
        self.groups.get(&parent)
    }

    /// Child that a fill reported against the parent belongs to.
    pub fn route_leg(&self, parent: OrderRef, leg: BracketLeg) -> Option<OrderRef> {
        let group = self.groups.get(&parent)?;
        match leg {
            BracketLeg::StopLoss => group.children.first().copied(),
            BracketLeg::TakeProfit => group.children.last().copied(),
        }
    }

    // ── OCO ────────────────────────────────────────────────────────────

    /// Place an order into an OCO group: the sibling's group when `sibling` is
    /// known, a fresh group otherwise.
    pub fn join_oco(
        &mut self,
        reference: OrderRef,
        sibling: Option<OrderRef>,
        refs: &mut RefAllocator,
    ) -> OcoGroupId {
        let group = sibling
            .and_then(|s| self.oco_of.get(&s).copied())
            .unwrap_or_else(|| refs.next_group());
        self.oco_members.entry(group).or_default().push(reference);
        self.oco_of.insert(reference, group);
        group
    }

    /// `reference` executed or terminated: dissolve its OCO group and return
    /// the other members, which the broker cancels.
    pub fn oco_triggered(&mut self, reference: OrderRef) -> Vec<OrderRef> {
        let Some(group) = self.oco_of.get(&reference).copied() else {
            return Vec::new();
        };
        let members = self.oco_members.remove(&group).unwrap_or_default();
        for m in &members {
            self.oco_of.remove(m);
        }
        members.into_iter().filter(|m| *m != reference).collect()
    }
}

/// Builder for a parent order with a protective stop and optional target.
///
/// Issues the parent and stop with `transmit = false` and the last order with
/// `transmit = true`, so the broker releases the whole group in one step.
pub struct BracketRequest {
    side: Side,
    entry: OrderRequest,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

/// References of the orders issued by [`BracketRequest::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrders {
    pub parent: Order,
    pub stop_loss: Option<Order>,
    pub take_profit: Option<Order>,
}

impl BracketRequest {
    pub fn new(side: Side, entry: OrderRequest) -> Self {
        Self {
            side,
            entry,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_stop_loss(mut self, stop_price: f64) -> Self {
        self.stop_loss = Some(stop_price);
        self
    }

    pub fn with_take_profit(mut self, target_price: f64) -> Self {
        self.take_profit = Some(target_price);
        self
    }

    /// Submit parent, stop-loss and take-profit to `broker`.
    pub fn submit<B: Broker + ?Sized>(self, broker: &mut B) -> Result<BracketOrders, BrokerError> {
        let exit_side = match self.side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };
        let has_children = self.stop_loss.is_some() || self.take_profit.is_some();

        let template = self.entry.clone();
        let parent = broker.create_order(self.side, self.entry.with_transmit(!has_children));
        let parent = broker.submit(parent)?;
        let parent_ref = parent.reference;

        let child = |exec_type: ExecType, price: f64, transmit: bool| {
            let mut req = OrderRequest::market(template.symbol.clone(), template.size)
                .with_exec_type(exec_type)
                .with_price(price)
                .with_parent(parent_ref)
                .with_trade_id(template.trade_id)
                .with_transmit(transmit);
            req.owner = template.owner.clone();
            req
        };

        let stop_loss = match self.stop_loss {
            Some(price) => {
                let req = child(ExecType::Stop, price, self.take_profit.is_none());
                let order = broker.create_order(exit_side, req);
                Some(broker.submit(order)?)
            }
            None => None,
        };

        let take_profit = match self.take_profit {
            Some(price) => {
                let order = broker.create_order(exit_side, child(ExecType::Limit, price, true));
                Some(broker.submit(order)?)
            }
            None => None,
        };

        Ok(BracketOrders {
            parent,
            stop_loss,
            take_profit,
        })
    }
}
