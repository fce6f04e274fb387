//! Simulated broker: matches resting orders against incoming price bars.
//!
//! Single-threaded and synchronous. One cycle per scheduler tick:
//!
//! 1. [`SimulatedBroker::on_bar`] for every instrument with a new bar.
//! 2. [`Broker::next`]:
//!    - activate bracket children whose parent completed last cycle;
//!    - check submitted orders against available cash (`check_submit`);
//!    - charge credit interest on open positions;
//!    - expire, skip (dormant) or try to execute each pending order whose
//!      instrument received a bar this cycle;
//!    - mark margin instruments to market at the close;
//!    - credit deposits, refresh fund value, push the cycle boundary.
//! 3. The strategy drains notifications and submits new orders, which are
//!    evaluated from the next cycle on.

use super::bracket::{BracketAction, BracketManager, Staging};
use super::notification::{FundSnapshot, Notification, NotificationQueue};
use super::trades::TradeBook;
use super::{Broker, BrokerError, OrderRequest};
use crate::commission::{CommissionRegistry, CommissionScheme, CommissionSettings};
use crate::config::{BrokerConfig, SlippageConfig};
use crate::domain::{
    Bar, ExecType, Fill, Order, OrderRef, OrderStatus, Position, RefAllocator, Side,
};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

pub struct SimulatedBroker {
    config: BrokerConfig,
    cash: f64,
    refs: RefAllocator,

    /// Every order ever created here, keyed (and so ordered) by reference.
    orders: BTreeMap<OrderRef, Order>,
    /// Accepted orders awaiting execution, in arrival order.
    pending: VecDeque<OrderRef>,
    /// Orders awaiting the cash check of the next cycle.
    submitted: VecDeque<OrderRef>,
    /// Bracket children to activate at the start of the next cycle.
    to_activate: VecDeque<OrderRef>,

    positions: HashMap<String, Position>,
    bars: HashMap<String, Bar>,
    /// Instruments that received a bar since the last cycle.
    fresh: HashSet<String>,
    now: Option<NaiveDateTime>,
    bar_index: usize,

    commissions: CommissionRegistry,
    brackets: BracketManager,
    trades: TradeBook,
    notifications: NotificationQueue,

    /// Accrued credit interest per instrument, paid into the closing commission.
    credit: HashMap<String, f64>,
    cash_additions: VecDeque<f64>,
    fund_value: f64,
    fund_shares: f64,
}

impl SimulatedBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let mut commissions = CommissionRegistry::default();
        commissions.set_commission(&config.commission);
        let fund_value = config.fund_start_value;
        let fund_shares = if fund_value > 0.0 {
            config.cash / fund_value
        } else {
            0.0
        };
        Self {
            cash: config.cash,
            config,
            refs: RefAllocator::new(),
            orders: BTreeMap::new(),
            pending: VecDeque::new(),
            submitted: VecDeque::new(),
            to_activate: VecDeque::new(),
            positions: HashMap::new(),
            bars: HashMap::new(),
            fresh: HashSet::new(),
            now: None,
            bar_index: 0,
            commissions,
            brackets: BracketManager::new(),
            trades: TradeBook::new(),
            notifications: NotificationQueue::new(),
            credit: HashMap::new(),
            cash_additions: VecDeque::new(),
            fund_value,
            fund_shares,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Feed the current bar of one instrument.
    pub fn on_bar(&mut self, bar: Bar) {
        self.now = Some(self.now.map_or(bar.datetime, |now| now.max(bar.datetime)));
        self.fresh.insert(bar.symbol.clone());
        self.bars.insert(bar.symbol.clone(), bar);
    }

    /// Deposit (positive) or withdraw (negative) cash at the next cycle.
    /// In fund accounting the amount buys or redeems fund shares.
    pub fn add_cash(&mut self, amount: f64) {
        self.cash_additions.push_back(amount);
    }

    pub fn fund_value(&self) -> f64 {
        self.fund_value
    }

    pub fn fund_shares(&self) -> f64 {
        self.fund_shares
    }

    /// All orders, oldest first.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn trades(&self) -> &TradeBook {
        &self.trades
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Submission ─────────────────────────────────────────────────────

    fn transmit(&mut self, reference: OrderRef) -> Result<(), BrokerError> {
        let oco = self
            .orders
            .get(&reference)
            .ok_or(BrokerError::UnknownOrder(reference))?
            .oco;
        let group = self.brackets.join_oco(reference, oco, &mut self.refs);

        let order = self
            .orders
            .get_mut(&reference)
            .ok_or(BrokerError::UnknownOrder(reference))?;
        order.oco_group = Some(group);
        order.submit()?;
        info!(order = %order, oco = %group, "order submitted");

        if self.config.check_submit {
            self.submitted.push_back(reference);
            self.notify(reference);
        } else {
            order.accept()?;
            self.pending.push_back(reference);
            self.notify(reference);
        }
        Ok(())
    }

    fn check_submitted(&mut self) -> Result<(), BrokerError> {
        let mut cash = self.cash;
        let mut positions: HashMap<String, Position> = HashMap::new();

        while let Some(reference) = self.submitted.pop_front() {
            let Some(order) = self.orders.get(&reference) else {
                continue;
            };
            if !order.alive() {
                continue;
            }
            let position = positions
                .entry(order.symbol.clone())
                .or_insert_with(|| self.positions.get(&order.symbol).cloned().unwrap_or_default());
            cash = pseudo_execute(order, cash, position, self.config.short_cash);

            if cash >= 0.0 {
                if let Some(order) = self.orders.get_mut(&reference) {
                    order.accept()?;
                    debug!(order = %order, "order accepted");
                }
                self.pending.push_back(reference);
                self.notify(reference);
            } else {
                warn!(order = %reference, cash, "insufficient cash at submission");
                self.terminate(reference, OrderStatus::Margin)?;
            }
        }
        Ok(())
    }

    // ── Termination and cascades ───────────────────────────────────────

    /// Move an alive order to a terminal state, notify, and cascade to its OCO
    /// group and bracket. Returns false when nothing changed.
    fn terminate(&mut self, reference: OrderRef, to: OrderStatus) -> Result<bool, BrokerError> {
        let order = self
            .orders
            .get_mut(&reference)
            .ok_or(BrokerError::UnknownOrder(reference))?;
        if !order.alive() {
            return Ok(false);
        }
        let changed = match to {
            OrderStatus::Cancelled => order.cancel()?,
            OrderStatus::Expired => order.expire()?,
            OrderStatus::Margin => order.margin()?,
            OrderStatus::Rejected => order.reject()?,
            _ => false,
        };
        if !changed {
            return Ok(false);
        }
        let parent = order.parent;
        debug!(order = %order, "order terminated");

        self.pending.retain(|r| *r != reference);
        self.submitted.retain(|r| *r != reference);
        self.notify(reference);
        self.oco_check(reference)?;
        let action = self.brackets.on_terminated(reference, parent);
        self.resolve(action)?;
        Ok(true)
    }

    fn oco_check(&mut self, reference: OrderRef) -> Result<(), BrokerError> {
        for sibling in self.brackets.oco_triggered(reference) {
            self.terminate(sibling, OrderStatus::Cancelled)?;
        }
        Ok(())
    }

    fn resolve(&mut self, action: Option<BracketAction>) -> Result<(), BrokerError> {
        match action {
            Some(BracketAction::Activate(children)) => self.to_activate.extend(children),
            Some(BracketAction::Cancel(members)) => {
                for member in members {
                    self.terminate(member, OrderStatus::Cancelled)?;
                }
            }
            None => {}
        }
        Ok(())
    }

    // ── Matching ───────────────────────────────────────────────────────

    fn try_exec(&mut self, reference: OrderRef, bar: &Bar) -> Result<(), BrokerError> {
        let order = self
            .orders
            .get(&reference)
            .ok_or(BrokerError::UnknownOrder(reference))?;
        let slip = &self.config.slippage;
        let is_buy = order.is_buy();
        let pstop = order.created.price.unwrap_or(order.created.pclose);
        let plimit = order.created.price_limit.unwrap_or(pstop);

        let cheat = order.exec_type == ExecType::Market
            && self.config.cheat_on_close
            && coc_allowed(order);
        // Only bars later than the order's creation can match it.
        if !cheat && order.created.dt.is_some_and(|created| bar.datetime <= created) {
            return Ok(());
        }

        let mut dt = bar.datetime;
        let mut triggered = false;
        let price = match order.exec_type {
            ExecType::Market => {
                if cheat {
                    dt = order.created.dt.unwrap_or(bar.datetime);
                    Some(order.created.pclose)
                } else if is_buy {
                    slip.slip_up(bar.high, bar.open, slip.slip_open, false)
                } else {
                    slip.slip_down(bar.low, bar.open, slip.slip_open, false)
                }
            }
            ExecType::Close => Some(bar.close),
            ExecType::Limit => match_limit(slip, is_buy, bar, pstop),
            ExecType::StopLimit | ExecType::StopTrailLimit if order.triggered => {
                match_limit(slip, is_buy, bar, plimit)
            }
            ExecType::Stop | ExecType::StopTrail => match_stop(slip, is_buy, bar, pstop),
            ExecType::StopLimit | ExecType::StopTrailLimit => {
                let (hit, price) = match_stop_limit(slip, is_buy, bar, pstop, plimit);
                triggered = hit;
                price
            }
        };
        let trails = order.exec_type == ExecType::StopTrail
            || (order.exec_type == ExecType::StopTrailLimit && !order.triggered);

        if triggered {
            if let Some(order) = self.orders.get_mut(&reference) {
                order.triggered = true;
            }
        }
        if let Some(price) = price {
            self.execute(reference, price, dt)?;
        }
        if trails {
            if let Some(order) = self.orders.get_mut(&reference) {
                if order.alive() {
                    order.trail_adjust(bar.close);
                }
            }
        }
        Ok(())
    }

    /// Fill the remaining size of `reference` at `price`, split into closing
    /// and opening legs with their cash effects.
    fn execute(&mut self, reference: OrderRef, price: f64, dt: NaiveDateTime) -> Result<(), BrokerError> {
        let order = self
            .orders
            .get(&reference)
            .ok_or(BrokerError::UnknownOrder(reference))?;
        let symbol = order.symbol.clone();
        let size = order.executed.remsize;
        let scheme = order.commission.clone();
        let short_cash = self.config.short_cash;

        let position = self.positions.entry(symbol.clone()).or_default();
        let pprice_orig = position.price;
        let preview = position.pseudo_update(size, price);
        let closed = preview.closed;
        let mut opened = preview.opened;
        let pnl = scheme.profit_and_loss(-closed, pprice_orig, price);
        let adjbase = position.adjbase.unwrap_or(price);

        let mut cash = self.cash;
        let (mut closed_value, mut closed_comm) = (0.0, 0.0);
        if closed != 0.0 {
            closed_value = if short_cash {
                scheme.value_size(-closed, pprice_orig)
            } else {
                scheme.operation_cost(closed, pprice_orig)
            };
            let mut close_cash = closed_value;
            if closed_value > 0.0 {
                close_cash /= scheme.leverage();
            }
            cash += close_cash + if scheme.is_stocklike() { pnl } else { 0.0 };
            closed_comm = scheme.commission(closed, price);
            cash -= closed_comm;
            cash += scheme.cash_adjust(-closed, adjbase, price);
            self.cash = cash;
        }

        let requested_open = opened;
        let (mut opened_value, mut opened_comm) = (0.0, 0.0);
        if opened != 0.0 {
            opened_value = if short_cash {
                scheme.value_size(opened, price)
            } else {
                scheme.operation_cost(opened, price)
            };
            let mut open_cash = opened_value;
            if opened_value > 0.0 {
                open_cash /= scheme.leverage();
            }
            cash -= open_cash;
            opened_comm = scheme.commission(opened, price);
            cash -= opened_comm;

            if cash < 0.0 {
                opened = 0.0;
                opened_value = 0.0;
                opened_comm = 0.0;
            } else {
                if preview.size.abs() > opened.abs() {
                    // Existing contracts are marked to the fill price; the new base covers all.
                    cash += scheme.cash_adjust(preview.size - opened, adjbase, price);
                }
                position.adjbase = Some(price);
                self.cash = cash;
            }
        }

        let exec_size = closed + opened;
        if exec_size != 0.0 {
            let after = position.update(exec_size, price);
            position.updated_at = Some(dt);
            if closed != 0.0 && self.config.interest_to_pnl {
                closed_comm += self.credit.remove(&symbol).unwrap_or(0.0);
            }

            let fill = Fill {
                dt,
                size: exec_size,
                price,
                closed,
                closed_value,
                closed_comm,
                opened,
                opened_value,
                opened_comm,
                margin: scheme.margin(price),
                pnl,
                psize: after.size,
                pprice: after.price,
            };
            let order = self
                .orders
                .get_mut(&reference)
                .ok_or(BrokerError::UnknownOrder(reference))?;
            order.execute(&fill)?;
            let filled = order.is_filled();
            if filled {
                order.completed()?;
            } else {
                order.partial()?;
            }
            let parent = order.parent;
            debug!(order = %order, size = exec_size, price, "order executed");

            self.notify(reference);
            self.oco_check(reference)?;
            if filled {
                let action = self.brackets.on_completed(reference, parent);
                self.resolve(action)?;
            }
        }

        if requested_open != 0.0 && opened == 0.0 {
            warn!(order = %reference, cash = self.cash, "insufficient cash to open position");
            self.terminate(reference, OrderStatus::Margin)?;
        }
        Ok(())
    }

    // ── End of cycle ───────────────────────────────────────────────────

    fn accrue_interest(&mut self) {
        let mut total = 0.0;
        for (symbol, position) in self.positions.iter_mut() {
            if position.is_flat() {
                continue;
            }
            let Some(bar) = self.bars.get(symbol) else {
                continue;
            };
            let credit = self
                .commissions
                .get(symbol)
                .credit_interest(position, bar.close, bar.datetime);
            *self.credit.entry(symbol.clone()).or_default() += credit;
            total += credit;
            position.updated_at = Some(bar.datetime);
        }
        self.cash -= total;
    }

    fn mark_to_market(&mut self) {
        for (symbol, position) in self.positions.iter_mut() {
            if position.is_flat() {
                continue;
            }
            let Some(bar) = self.bars.get(symbol) else {
                continue;
            };
            let base = position.adjbase.unwrap_or(bar.close);
            self.cash += self
                .commissions
                .get(symbol)
                .cash_adjust(position.size, base, bar.close);
            position.adjbase = Some(bar.close);
        }
    }

    fn apply_cash_additions(&mut self) {
        while let Some(amount) = self.cash_additions.pop_front() {
            if self.fund_value > 0.0 {
                self.fund_shares += amount / self.fund_value;
            }
            self.cash += amount;
            info!(amount, cash = self.cash, "cash added");
        }
    }

    /// Total value with long positions unlevered, or the raw position value
    /// of the listed instruments.
    fn compute_value(&self, symbols: Option<&[&str]>) -> f64 {
        let all: Vec<&str>;
        let selected = match symbols {
            Some(list) => list,
            None => {
                all = self.positions.keys().map(String::as_str).collect();
                &all[..]
            }
        };

        let mut listed = 0.0;
        let mut unlevered = 0.0;
        for symbol in selected {
            let (Some(position), Some(bar)) = (self.positions.get(*symbol), self.bars.get(*symbol))
            else {
                continue;
            };
            let scheme = self.commissions.get(symbol);
            let mut value = scheme.value_size(position.size, bar.close);
            if !self.config.short_cash {
                value = value.abs();
            }
            let unrealized = scheme.profit_and_loss(position.size, position.price, bar.close);
            listed += value;
            if value > 0.0 {
                unlevered += (value - unrealized) / scheme.leverage() + unrealized;
            } else {
                unlevered += value;
            }
        }
        match symbols {
            Some(_) => listed,
            None => self.cash + unlevered,
        }
    }
}

impl Broker for SimulatedBroker {
    fn create_order(&mut self, side: Side, request: OrderRequest) -> Order {
        let reference = self.refs.next_order();
        let scheme = self.commissions.get(&request.symbol).clone();
        let bar = self.bars.get(&request.symbol);
        let pclose = bar
            .map(|b| b.close)
            .or(request.price)
            .unwrap_or(0.0);
        let dt = bar.map(|b| b.datetime).or(self.now);

        let mut order = request.into_order(reference, side);
        order.commission = scheme;
        order.stamp(dt, pclose);
        order
    }

    fn submit(&mut self, mut order: Order) -> Result<Order, BrokerError> {
        let reference = order.reference;
        if self.orders.contains_key(&reference) {
            return Err(BrokerError::DuplicateSubmit(reference));
        }

        match self.brackets.stage(reference, order.parent, order.transmit) {
            Staging::Orphan => {
                warn!(order = %order, "bracket child without pending parent rejected");
                order.reject()?;
                self.orders.insert(reference, order);
                self.notify(reference);
            }
            Staging::Hold => {
                self.orders.insert(reference, order);
            }
            Staging::Transmit(group) => {
                self.orders.insert(reference, order);
                for member in group {
                    self.transmit(member)?;
                }
            }
        }
        self.orders
            .get(&reference)
            .cloned()
            .ok_or(BrokerError::UnknownOrder(reference))
    }

    fn cancel(&mut self, reference: OrderRef) -> Result<bool, BrokerError> {
        if !self.orders.contains_key(&reference) {
            return Err(BrokerError::UnknownOrder(reference));
        }
        if !self.pending.contains(&reference) && !self.submitted.contains(&reference) {
            return Ok(false);
        }
        let cancelled = self.terminate(reference, OrderStatus::Cancelled)?;
        if cancelled {
            info!(order = %reference, "order cancelled");
        }
        Ok(cancelled)
    }

    fn order(&self, reference: OrderRef) -> Option<Order> {
        self.orders.get(&reference).cloned()
    }

    fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    fn cash(&self) -> f64 {
        self.cash
    }

    fn value(&self, symbols: Option<&[&str]>) -> f64 {
        self.compute_value(symbols)
    }

    fn next(&mut self) -> Result<(), BrokerError> {
        self.bar_index += 1;

        while let Some(reference) = self.to_activate.pop_front() {
            if let Some(order) = self.orders.get_mut(&reference) {
                order.activate();
                debug!(order = %order, "bracket child activated");
            }
        }

        if self.config.check_submit {
            self.check_submitted()?;
        }
        self.accrue_interest();

        let queue: Vec<OrderRef> = self.pending.drain(..).collect();
        for reference in queue {
            let Some(order) = self.orders.get(&reference) else {
                continue;
            };
            // Cancelled by a cascade earlier in this pass.
            if !order.alive() {
                continue;
            }
            let bar = match self.bars.get(&order.symbol) {
                Some(bar) if self.fresh.contains(&order.symbol) => bar.clone(),
                _ => {
                    self.pending.push_back(reference);
                    continue;
                }
            };

            if order.is_expired_at(bar.datetime) {
                self.terminate(reference, OrderStatus::Expired)?;
                continue;
            }
            if !order.is_active() {
                self.pending.push_back(reference);
                continue;
            }

            self.try_exec(reference, &bar)?;
            if self.orders.get(&reference).is_some_and(Order::alive) {
                self.pending.push_back(reference);
            }
        }

        self.mark_to_market();
        self.fresh.clear();
        self.apply_cash_additions();
        self.trades.tick(self.bar_index);

        let value = self.compute_value(None);
        if self.fund_shares > 0.0 {
            self.fund_value = value / self.fund_shares;
        }
        if self.config.fund_mode {
            self.notifications.push(Notification::Fund(FundSnapshot {
                cash: self.cash,
                value,
                fund_value: self.fund_value,
                fund_shares: self.fund_shares,
            }));
        }
        self.notifications.boundary();
        Ok(())
    }

    fn notify(&mut self, reference: OrderRef) {
        let Some(order) = self.orders.get_mut(&reference) else {
            warn!(order = %reference, "notify for unknown order");
            return;
        };
        let snapshot = order.snapshot();
        let updates = self
            .trades
            .apply(&snapshot, snapshot.pending_executions(), self.bar_index);
        self.notifications.push(Notification::Order(snapshot));
        for trade in updates {
            self.notifications.push(Notification::Trade(trade));
        }
    }

    fn get_notification(&mut self) -> Option<Notification> {
        self.notifications.pop()
    }

    fn commission_scheme(&self, symbol: &str) -> CommissionScheme {
        self.commissions.get(symbol).clone()
    }

    fn set_commission(&mut self, settings: &CommissionSettings) {
        self.commissions.set_commission(settings);
    }
}

// ── Matching rules ─────────────────────────────────────────────────────

/// Cheat-on-close can be disabled per order with `info["coc"] = false`.
fn coc_allowed(order: &Order) -> bool {
    order
        .info
        .get("coc")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

/// Cash left after executing the whole order at its creation price against
/// `position`, which is updated in place.
fn pseudo_execute(order: &Order, mut cash: f64, position: &mut Position, short_cash: bool) -> f64 {
    let scheme = &order.commission;
    let price = order.created.price.unwrap_or(order.created.pclose);
    let up = position.update(order.executed.remsize, price);

    if up.closed != 0.0 {
        let closed_value = if short_cash {
            scheme.value_size(-up.closed, price)
        } else {
            scheme.operation_cost(up.closed, price)
        };
        let mut close_cash = closed_value;
        if closed_value > 0.0 {
            close_cash /= scheme.leverage();
        }
        cash += close_cash;
        cash -= scheme.commission(up.closed, price);
    }
    if up.opened != 0.0 {
        let opened_value = if short_cash {
            scheme.value_size(up.opened, price)
        } else {
            scheme.operation_cost(up.opened, price)
        };
        let mut open_cash = opened_value;
        if opened_value > 0.0 {
            open_cash /= scheme.leverage();
        }
        cash -= open_cash;
        cash -= scheme.commission(up.opened, price);
    }
    cash
}

fn match_limit(slip: &SlippageConfig, is_buy: bool, bar: &Bar, plimit: f64) -> Option<f64> {
    if is_buy {
        if plimit >= bar.open {
            // Opened at or below the limit: buy at the open.
            slip.slip_up(plimit.min(bar.high), bar.open, slip.slip_open, true)
        } else if plimit >= bar.low {
            Some(plimit)
        } else {
            None
        }
    } else if plimit <= bar.open {
        slip.slip_down(plimit.max(bar.low), bar.open, slip.slip_open, true)
    } else if plimit <= bar.high {
        Some(plimit)
    } else {
        None
    }
}

fn match_stop(slip: &SlippageConfig, is_buy: bool, bar: &Bar, pstop: f64) -> Option<f64> {
    if is_buy {
        if bar.open >= pstop {
            // Gapped through the stop.
            slip.slip_up(bar.high, bar.open, slip.slip_open, false)
        } else if bar.high >= pstop {
            slip.slip_up(bar.high, pstop, true, false)
        } else {
            None
        }
    } else if bar.open <= pstop {
        slip.slip_down(bar.low, bar.open, slip.slip_open, false)
    } else if bar.low <= pstop {
        slip.slip_down(bar.low, pstop, true, false)
    } else {
        None
    }
}

/// Returns whether the stop was touched and the fill price, if any.
fn match_stop_limit(
    slip: &SlippageConfig,
    is_buy: bool,
    bar: &Bar,
    pstop: f64,
    plimit: f64,
) -> (bool, Option<f64>) {
    if is_buy {
        if bar.open >= pstop {
            return (true, match_limit(slip, is_buy, bar, plimit));
        }
        if bar.high < pstop {
            return (false, None);
        }
        // Touched during the bar; only the open/close order is known.
        let price = if plimit >= pstop {
            slip.slip_up(bar.high, pstop, true, true)
        } else if bar.open > bar.close && plimit >= bar.close {
            Some(plimit)
        } else {
            None
        };
        (true, price)
    } else {
        if bar.open <= pstop {
            return (true, match_limit(slip, is_buy, bar, plimit));
        }
        if bar.low > pstop {
            return (false, None);
        }
        let price = if plimit <= pstop {
            slip.slip_down(bar.low, pstop, true, true)
        } else if bar.open <= bar.close && plimit <= bar.close {
            Some(plimit)
        } else {
            None
        };
        (true, price)
    }
}
