//! Shared live order book.
//!
//! All state touched by both the strategy side and the venue event pump lives
//! here, behind one `parking_lot::Mutex` owned by [`crate::LiveBroker`].
//! Venue messages that cannot be matched to a live order are logged and
//! dropped; duplicate status messages are absorbed by the idempotent order
//! transitions.

use std::collections::{BTreeMap, HashMap, HashSet};

use brokerlab_core::broker::{
    BracketAction, BracketLeg, BracketManager, Notification, NotificationQueue, TradeBook,
};
use brokerlab_core::domain::{Fill, Order, OrderError, OrderRef, Position, RefAllocator};
use tracing::{debug, info, warn};

use crate::context::VenueContext;
use crate::translate::{translate, VenueIds, VenueOrder};
use crate::venue::{
    CommissionReportMsg, ExecutionMsg, OpenOrderMsg, OrderErrorMsg, OrderStatusMsg, VenueEvent,
    VenueOrderId, VenueResult, VenueStatus,
};

#[derive(Debug, Default)]
pub struct LiveBook {
    orders: BTreeMap<OrderRef, Order>,
    by_venue_id: HashMap<VenueOrderId, OrderRef>,
    venue_ids: HashMap<OrderRef, VenueOrderId>,
    oca_groups: HashMap<OrderRef, String>,
    /// Orders the venue announced in a cancel-side open-order state; their
    /// cancellation is reported as an expiry.
    will_expire: HashSet<OrderRef>,

    positions: HashMap<String, Position>,
    brackets: BracketManager,
    trades: TradeBook,
    notifications: NotificationQueue,

    /// Executions waiting for their commission report, by execution id.
    executions: HashMap<String, ExecutionMsg>,
    /// Commission reports that arrived before their execution.
    reports: HashMap<String, CommissionReportMsg>,
    finalized: HashSet<String>,

    cash: f64,
    value: f64,
    cycle: usize,
}

impl LiveBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn order(&self, reference: OrderRef) -> Option<&Order> {
        self.orders.get(&reference)
    }

    pub fn contains(&self, reference: OrderRef) -> bool {
        self.orders.contains_key(&reference)
    }

    pub fn venue_id(&self, reference: OrderRef) -> Option<VenueOrderId> {
        self.venue_ids.get(&reference).copied()
    }

    pub fn oca_group(&self, reference: OrderRef) -> Option<&str> {
        self.oca_groups.get(&reference).map(String::as_str)
    }

    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&String, &Position)> {
        self.positions.iter()
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_account(&mut self, cash: f64, value: f64) {
        self.cash = cash;
        self.value = value;
    }

    pub fn trades(&self) -> &TradeBook {
        &self.trades
    }

    /// Executions and commission reports still waiting for their counterpart.
    pub fn unmatched(&self) -> (usize, usize) {
        (self.executions.len(), self.reports.len())
    }

    pub fn brackets_mut(&mut self) -> &mut BracketManager {
        &mut self.brackets
    }

    // ── Registration ───────────────────────────────────────────────────

    /// Take ownership of a newly created order and bind it to its venue id.
    pub fn register(&mut self, order: Order, venue_id: VenueOrderId) {
        let reference = order.reference;
        self.by_venue_id.insert(venue_id, reference);
        self.venue_ids.insert(reference, venue_id);
        self.orders.insert(reference, order);
    }

    /// Adopt a position already held at the venue, reported through a
    /// synthetic completed order.
    pub fn adopt(&mut self, mut order: Order, price: f64) -> Result<(), OrderError> {
        let size = order.size();
        let dt = order.created.dt.unwrap_or_default();
        let mut position = Position::new(size, price);
        position.updated_at = order.created.dt;

        let fill = Fill {
            opened: size,
            opened_value: order.commission.operation_cost(size, price),
            margin: price,
            psize: size,
            pprice: price,
            ..Fill::new(dt, size, price)
        };
        order.submit()?;
        order.accept()?;
        order.execute(&fill)?;
        order.completed()?;
        info!(order = %order, price, "venue position adopted");

        let reference = order.reference;
        self.positions.insert(order.symbol.clone(), position);
        self.orders.insert(reference, order);
        self.notify(reference);
        Ok(())
    }

    /// Move a released group to `Submitted` and build its venue payloads,
    /// parent first. Nothing is mutated when any member fails to translate.
    pub fn prepare(
        &mut self,
        members: &[OrderRef],
        context: &VenueContext,
        refs: &mut RefAllocator,
    ) -> VenueResult<Vec<VenueOrder>> {
        let mut bracket_oca: Option<String> = None;
        let mut payloads = Vec::with_capacity(members.len());
        let mut groups = Vec::with_capacity(members.len());

        for reference in members {
            let Some(order) = self.orders.get(reference) else {
                continue;
            };
            let oca_group = match (order.oco, order.parent) {
                (Some(sibling), _) => self
                    .oca_groups
                    .get(&sibling)
                    .cloned()
                    .unwrap_or_else(|| context.new_oca_group()),
                (None, Some(_)) => bracket_oca
                    .get_or_insert_with(|| context.new_oca_group())
                    .clone(),
                (None, None) => context.new_oca_group(),
            };
            let ids = VenueIds {
                order_id: self.venue_ids.get(reference).copied().unwrap_or_default(),
                client_id: context.client_id(),
                oca_group: oca_group.clone(),
                parent_id: order.parent.and_then(|p| self.venue_ids.get(&p).copied()),
            };
            payloads.push(translate(order, ids)?);
            groups.push((*reference, oca_group));
        }

        for (reference, oca_group) in groups {
            let oco = self.orders.get(&reference).and_then(|o| o.oco);
            let group = self.brackets.join_oco(reference, oco, refs);
            self.oca_groups.insert(reference, oca_group);
            if let Some(order) = self.orders.get_mut(&reference) {
                order.oco_group = Some(group);
                if let Err(err) = order.submit() {
                    warn!(order = %reference, error = %err, "order could not be submitted");
                    continue;
                }
                info!(order = %order, oco = %group, "order submitted");
            }
            self.notify(reference);
        }
        Ok(payloads)
    }

    /// Reject every unfinished member of a group that could not be placed.
    pub fn reject_all(&mut self, members: &[OrderRef]) {
        for reference in members {
            let result = match self.orders.get_mut(reference) {
                Some(order) if !order.status.is_terminal() => order.reject(),
                _ => continue,
            };
            self.settle(*reference, result);
        }
    }

    // ── Notifications ──────────────────────────────────────────────────

    pub fn notify(&mut self, reference: OrderRef) {
        let Some(order) = self.orders.get_mut(&reference) else {
            warn!(order = %reference, "notify for unknown order");
            return;
        };
        let snapshot = order.snapshot();
        let updates = self
            .trades
            .apply(&snapshot, snapshot.pending_executions(), self.cycle);
        self.notifications.push(Notification::Order(snapshot));
        for trade in updates {
            self.notifications.push(Notification::Trade(trade));
        }
    }

    /// Close the current cycle.
    pub fn boundary(&mut self) {
        self.cycle += 1;
        self.trades.tick(self.cycle);
        self.notifications.boundary();
    }

    pub fn pop_notification(&mut self) -> Option<Notification> {
        self.notifications.pop()
    }

    // ── Venue events ───────────────────────────────────────────────────

    pub fn apply(&mut self, event: VenueEvent) {
        match event {
            VenueEvent::Status(msg) => self.on_status(msg),
            VenueEvent::OpenOrder(msg) => self.on_open_order(msg),
            VenueEvent::Execution(msg) => self.on_execution(msg),
            VenueEvent::Commission(msg) => self.on_commission(msg),
            VenueEvent::Error(msg) => self.on_error(msg),
            VenueEvent::Account(update) => self.set_account(update.cash, update.value),
        }
    }

    fn lookup(&self, venue_id: VenueOrderId) -> Option<OrderRef> {
        let reference = self.by_venue_id.get(&venue_id).copied();
        if reference.is_none() {
            warn!(venue_id, "message for unknown venue order dropped");
        }
        reference
    }

    fn on_status(&mut self, msg: OrderStatusMsg) {
        let Some(reference) = self.lookup(msg.order_id) else {
            return;
        };
        let Some(order) = self.orders.get_mut(&reference) else {
            return;
        };
        let result = match msg.status {
            VenueStatus::Submitted if msg.filled == 0.0 => order.accept(),
            VenueStatus::Cancelled => {
                if self.will_expire.remove(&reference) {
                    order.expire()
                } else {
                    order.cancel()
                }
            }
            VenueStatus::Expired => order.expire(),
            VenueStatus::Inactive => order.reject(),
            // Fills are carried by executions; the remaining states need no action.
            _ => {
                debug!(order = %reference, status = ?msg.status, filled = msg.filled, "venue status");
                return;
            }
        };
        self.settle(reference, result);
    }

    fn on_open_order(&mut self, msg: OpenOrderMsg) {
        let Some(reference) = self.lookup(msg.order_id) else {
            return;
        };
        if matches!(msg.status, VenueStatus::PendingCancel | VenueStatus::Cancelled) {
            debug!(order = %reference, "cancel-side open order state, expecting expiry");
            self.will_expire.insert(reference);
        }
    }

    fn on_error(&mut self, msg: OrderErrorMsg) {
        let Some(reference) = self.lookup(msg.order_id) else {
            return;
        };
        let Some(order) = self.orders.get_mut(&reference) else {
            return;
        };
        warn!(order = %reference, code = msg.code, message = %msg.message, "venue order error");
        let result = match msg.code {
            OrderErrorMsg::CANCELLED if order.alive() => order.cancel(),
            OrderErrorMsg::CANCELLED => return,
            OrderErrorMsg::REJECTED => order.reject(),
            _ if order.alive() => order.reject(),
            _ => return,
        };
        self.settle(reference, result);
    }

    /// Notify and cascade after a status transition driven by the venue.
    fn settle(&mut self, reference: OrderRef, result: Result<bool, OrderError>) {
        match result {
            Ok(false) => debug!(order = %reference, "duplicate venue status absorbed"),
            Ok(true) => {
                self.notify(reference);
                let terminal = self
                    .orders
                    .get(&reference)
                    .map(|o| o.status.is_terminal())
                    .unwrap_or(false);
                if terminal {
                    self.cascade_terminated(reference);
                }
            }
            Err(err) => warn!(order = %reference, error = %err, "venue status dropped"),
        }
    }

    fn cascade_terminated(&mut self, reference: OrderRef) {
        for sibling in self.brackets.oco_triggered(reference) {
            self.cancel_local(sibling);
        }
        let parent = self.orders.get(&reference).and_then(|o| o.parent);
        let action = self.brackets.on_terminated(reference, parent);
        self.resolve(action);
    }

    /// Cancel in the local book only; the venue cancels linked orders itself.
    fn cancel_local(&mut self, reference: OrderRef) {
        let result = match self.orders.get_mut(&reference) {
            Some(order) if order.alive() => order.cancel(),
            _ => return,
        };
        if let Ok(true) = result {
            debug!(order = %reference, "linked order cancelled");
        }
        self.settle(reference, result);
    }

    fn resolve(&mut self, action: Option<BracketAction>) {
        match action {
            Some(BracketAction::Activate(children)) => {
                for child in children {
                    if let Some(order) = self.orders.get_mut(&child) {
                        order.activate();
                        debug!(order = %child, "bracket child active");
                    }
                }
            }
            Some(BracketAction::Cancel(members)) => {
                for member in members {
                    self.cancel_local(member);
                }
            }
            None => {}
        }
    }

    // ── Executions ─────────────────────────────────────────────────────

    fn on_execution(&mut self, msg: ExecutionMsg) {
        if self.finalized.contains(&msg.exec_id) || self.executions.contains_key(&msg.exec_id) {
            debug!(exec_id = %msg.exec_id, "duplicate execution absorbed");
            return;
        }
        if let Some(commission) = msg.commission {
            self.finalize(msg, commission, None);
            return;
        }
        match self.reports.remove(&msg.exec_id) {
            Some(report) => self.finalize(msg, report.commission, report.realized_pnl),
            None => {
                self.executions.insert(msg.exec_id.clone(), msg);
            }
        }
    }

    fn on_commission(&mut self, msg: CommissionReportMsg) {
        if self.finalized.contains(&msg.exec_id) {
            debug!(exec_id = %msg.exec_id, "duplicate commission report absorbed");
            return;
        }
        match self.executions.remove(&msg.exec_id) {
            Some(execution) => self.finalize(execution, msg.commission, msg.realized_pnl),
            None => {
                self.reports.insert(msg.exec_id.clone(), msg);
            }
        }
    }

    /// Order a fill applies to: the reported order while it is alive,
    /// otherwise the bracket child named by the fill's leg.
    fn fill_target(&self, reference: OrderRef, leg: Option<BracketLeg>) -> Option<OrderRef> {
        let order = self.orders.get(&reference)?;
        if order.alive() {
            return Some(reference);
        }
        let root = order.parent.unwrap_or(reference);
        let routed = leg.and_then(|leg| self.brackets.route_leg(root, leg));
        if routed.is_none() {
            warn!(order = %reference, status = %order.status, "fill for finished order dropped");
        }
        routed
    }

    fn finalize(&mut self, msg: ExecutionMsg, commission: f64, realized_pnl: Option<f64>) {
        self.finalized.insert(msg.exec_id.clone());
        let Some(reported) = self.lookup(msg.order_id) else {
            return;
        };
        let Some(target) = self.fill_target(reported, msg.leg) else {
            return;
        };
        let Some(order) = self.orders.get(&target) else {
            return;
        };
        let symbol = order.symbol.clone();
        let scheme = order.commission.clone();
        let size = msg.side.sign() * msg.shares;
        let price = msg.price;

        let position = self.positions.entry(symbol).or_default();
        let pprice_orig = position.price;
        let preview = position.pseudo_update(size, price);
        let closed_comm = if size != 0.0 {
            commission * preview.closed / size
        } else {
            0.0
        };
        let pnl = if preview.closed != 0.0 {
            realized_pnl.unwrap_or_else(|| scheme.profit_and_loss(-preview.closed, pprice_orig, price))
        } else {
            0.0
        };
        let fill = Fill {
            dt: msg.time,
            size,
            price,
            closed: preview.closed,
            closed_value: scheme.operation_cost(preview.closed, pprice_orig),
            closed_comm,
            opened: preview.opened,
            opened_value: scheme.operation_cost(preview.opened, price),
            opened_comm: commission - closed_comm,
            margin: price,
            pnl,
            psize: preview.size,
            pprice: preview.price,
        };

        let Some(order) = self.orders.get_mut(&target) else {
            return;
        };
        if let Err(err) = order.execute(&fill) {
            warn!(order = %target, exec_id = %msg.exec_id, error = %err, "execution dropped");
            return;
        }
        position.update(size, price);
        position.updated_at = Some(msg.time);

        let filled = order.is_filled();
        let transition = if filled {
            order.completed()
        } else {
            order.partial()
        };
        if let Err(err) = transition {
            warn!(order = %target, error = %err, "fill status transition refused");
        }
        if target == reported && (order.executed.size.abs() - msg.cum_qty).abs() > 1e-9 {
            // Earlier fills still waiting for their commission reports.
            debug!(
                order = %target,
                applied = order.executed.size.abs(),
                venue = msg.cum_qty,
                "venue cumulative quantity ahead of applied fills"
            );
        }
        let parent = order.parent;
        info!(order = %order, size, price, commission, "execution");

        self.notify(target);
        for sibling in self.brackets.oco_triggered(target) {
            self.cancel_local(sibling);
        }
        if filled {
            let action = self.brackets.on_completed(target, parent);
            self.resolve(action);
        }
    }
}
