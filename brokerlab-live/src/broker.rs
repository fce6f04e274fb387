//! [`Broker`] implementation over a venue connection.
//!
//! Strategy-side calls lock the shared [`LiveBook`] only for bookkeeping and
//! release it before talking to the venue, so the event pump is never blocked
//! behind a venue round trip. Cancellation is cooperative: `cancel` sends the
//! request and the order keeps its status until the venue confirms.

use std::sync::Arc;

use brokerlab_core::broker::{Broker, BrokerError, Notification, OrderRequest, Staging};
use brokerlab_core::commission::{CommissionRegistry, CommissionScheme, CommissionSettings};
use brokerlab_core::domain::{Order, OrderRef, Position, RefAllocator, Side};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::book::LiveBook;
use crate::config::LiveConfig;
use crate::context::VenueContext;
use crate::pump::{channels, EventPump, VenueSenders};

pub struct LiveBroker {
    context: Arc<VenueContext>,
    book: Arc<Mutex<LiveBook>>,
    config: LiveConfig,
    refs: RefAllocator,
    commissions: CommissionRegistry,
}

impl LiveBroker {
    pub fn new(context: Arc<VenueContext>, config: LiveConfig) -> Self {
        let mut commissions = CommissionRegistry::default();
        commissions.set_commission(&config.commission);
        Self {
            context,
            book: Arc::new(Mutex::new(LiveBook::new())),
            config,
            refs: RefAllocator::new(),
            commissions,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<VenueContext> {
        &self.context
    }

    /// Shared handle on the book.
    pub fn book(&self) -> Arc<Mutex<LiveBook>> {
        Arc::clone(&self.book)
    }

    /// Channels feeding this broker's book.
    pub fn event_channels(&self) -> (VenueSenders, EventPump) {
        channels(self.book())
    }

    /// Load the account snapshot and, with `use_positions`, adopt the
    /// positions already open at the venue.
    pub fn start(&mut self) -> Result<(), BrokerError> {
        let client = self.context.client();
        let account = client.account()?;
        self.book.lock().set_account(account.cash, account.value);
        info!(cash = account.cash, value = account.value, "account loaded");

        if !self.config.use_positions {
            return Ok(());
        }
        let positions = client.positions()?;
        let now = self.context.now();
        let mut book = self.book.lock();
        for held in positions.into_iter().filter(|p| p.size != 0.0) {
            let side = if held.size > 0.0 { Side::Buy } else { Side::Sell };
            let mut order = OrderRequest::market(held.symbol.clone(), held.size.abs())
                .into_order(self.refs.next_order(), side);
            order.commission = self.commissions.get(&held.symbol).clone();
            order.created.dt = Some(now);
            order.created.price = Some(held.price);
            order.created.pclose = held.price;
            book.adopt(order, held.price)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LiveBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBroker")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Broker for LiveBroker {
    fn create_order(&mut self, side: Side, request: OrderRequest) -> Order {
        let reference = self.refs.next_order();
        let scheme = self.commissions.get(&request.symbol).clone();
        let pclose = request.price.unwrap_or(0.0);
        let now = self.context.now();

        let mut order = request.into_order(reference, side);
        order.commission = scheme;
        order.created.dt = Some(now);
        order.created.pclose = pclose;
        order.valid_until = order.valid.expires_at(Some(now));
        order
    }

    fn submit(&mut self, order: Order) -> Result<Order, BrokerError> {
        let reference = order.reference;
        let mut book = self.book.lock();
        if book.contains(reference) {
            return Err(BrokerError::DuplicateSubmit(reference));
        }

        let staging = book
            .brackets_mut()
            .stage(reference, order.parent, order.transmit);
        book.register(order, self.context.next_order_id());

        let members = match staging {
            Staging::Orphan => {
                warn!(order = %reference, "bracket child without pending parent rejected");
                book.reject_all(&[reference]);
                return book
                    .order(reference)
                    .cloned()
                    .ok_or(BrokerError::UnknownOrder(reference));
            }
            Staging::Hold => {
                return book
                    .order(reference)
                    .cloned()
                    .ok_or(BrokerError::UnknownOrder(reference));
            }
            Staging::Transmit(members) => members,
        };

        let payloads = match book.prepare(&members, &self.context, &mut self.refs) {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!(order = %reference, error = %err, "order could not be translated");
                book.reject_all(&members);
                return Err(err.into());
            }
        };
        drop(book);

        if let Err(err) = self.context.client().place_orders(&payloads) {
            warn!(order = %reference, error = %err, "venue refused orders");
            self.book.lock().reject_all(&members);
            return Err(err.into());
        }
        info!(order = %reference, count = payloads.len(), "orders placed");

        self.book
            .lock()
            .order(reference)
            .cloned()
            .ok_or(BrokerError::UnknownOrder(reference))
    }

    fn cancel(&mut self, reference: OrderRef) -> Result<bool, BrokerError> {
        let venue_id = {
            let book = self.book.lock();
            let order = book
                .order(reference)
                .ok_or(BrokerError::UnknownOrder(reference))?;
            if !order.alive() {
                return Ok(false);
            }
            book.venue_id(reference)
                .ok_or(BrokerError::UnknownOrder(reference))?
        };
        self.context.client().cancel_order(venue_id)?;
        info!(order = %reference, venue_id, "cancel requested");
        Ok(true)
    }

    fn order(&self, reference: OrderRef) -> Option<Order> {
        self.book.lock().order(reference).cloned()
    }

    fn position(&self, symbol: &str) -> Position {
        self.book.lock().position(symbol)
    }

    fn cash(&self) -> f64 {
        self.book.lock().cash()
    }

    /// Without a symbol list this is the venue-reported account value; with
    /// one it is the listed positions valued at their average price.
    fn value(&self, symbols: Option<&[&str]>) -> f64 {
        let book = self.book.lock();
        match symbols {
            None => book.value(),
            Some(symbols) => symbols
                .iter()
                .map(|symbol| {
                    let position = book.position(symbol);
                    self.commissions
                        .get(symbol)
                        .position_value(&position, position.price)
                })
                .sum(),
        }
    }

    fn next(&mut self) -> Result<(), BrokerError> {
        self.book.lock().boundary();
        Ok(())
    }

    fn notify(&mut self, reference: OrderRef) {
        self.book.lock().notify(reference);
    }

    fn get_notification(&mut self) -> Option<Notification> {
        self.book.lock().pop_notification()
    }

    fn commission_scheme(&self, symbol: &str) -> CommissionScheme {
        self.commissions.get(symbol).clone()
    }

    fn set_commission(&mut self, settings: &CommissionSettings) {
        self.commissions.set_commission(settings);
    }
}
