use crate::domain::{ExecutionBit, Order, Trade, TradeFill, TradeId};
use std::collections::HashMap;

/// Trades per (symbol, trade id), fed from the pending fills of order snapshots.
///
/// Each fill is applied closing leg first: a reversal closes the current trade
/// and its opening leg starts a new one.
#[derive(Debug, Clone, Default)]
pub struct TradeBook {
    trades: HashMap<(String, TradeId), Vec<Trade>>,
    next_ref: u64,
}

impl TradeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `bits` of `order` and return a snapshot of every trade update.
    pub fn apply(&mut self, order: &Order, bits: &[ExecutionBit], bar: usize) -> Vec<Trade> {
        let mut updates = Vec::new();
        for bit in bits {
            if bit.closed != 0.0 {
                let fill = TradeFill {
                    order: order.reference,
                    size: bit.closed,
                    price: bit.price,
                    commission: bit.closed_comm,
                    bar,
                    dt: bit.dt,
                };
                let trade = self.current(&order.symbol, order.trade_id);
                trade.update(&fill, &order.commission);
                updates.push(trade.clone());
            }
            if bit.opened != 0.0 {
                let fill = TradeFill {
                    order: order.reference,
                    size: bit.opened,
                    price: bit.price,
                    commission: bit.opened_comm,
                    bar,
                    dt: bit.dt,
                };
                let trade = self.current(&order.symbol, order.trade_id);
                trade.update(&fill, &order.commission);
                updates.push(trade.clone());
            }
        }
        updates
    }

    /// The open (or not yet opened) trade for the key, starting a new one
    /// after a close.
    fn current(&mut self, symbol: &str, trade_id: TradeId) -> &mut Trade {
        let history = self
            .trades
            .entry((symbol.to_string(), trade_id))
            .or_default();
        if history.last().map_or(true, |t| t.is_closed) {
            self.next_ref += 1;
            history.push(Trade::new(self.next_ref, symbol, trade_id));
        }
        let last = history.len() - 1;
        &mut history[last]
    }

    /// All trades for the key, oldest first.
    pub fn trades(&self, symbol: &str, trade_id: TradeId) -> &[Trade] {
        self.trades
            .get(&(symbol.to_string(), trade_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values().flatten().filter(|t| t.is_open)
    }

    /// Advance the bar count of every open trade.
    pub fn tick(&mut self, bar: usize) {
        for trade in self.trades.values_mut().flatten() {
            trade.tick(bar);
        }
    }
}
