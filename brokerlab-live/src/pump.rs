//! Venue event pump.
//!
//! The venue connection pushes each message type into its own unbounded
//! channel; a single consumer task drains them into the shared [`LiveBook`].
//! Only the consumer applies venue events, so every book mutation from the
//! venue side is serialized through one task.
//!
//! [`VenueSenders::send`] stamps every event with a connection-wide sequence
//! number and the consumer applies events in stamp order, so a status
//! followed by a fill on another channel is still applied status first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::book::LiveBook;
use crate::venue::{
    AccountUpdate, CommissionReportMsg, ExecutionMsg, OpenOrderMsg, OrderErrorMsg, OrderStatusMsg,
    VenueEvent,
};

type Stamped<T> = (u64, T);

/// Producer half handed to the venue connection.
///
/// Clones share one sequence counter. Events are applied in the order they
/// were sent, which holds as long as each message is sent before the next
/// one is read off the wire.
#[derive(Debug, Clone)]
pub struct VenueSenders {
    seq: Arc<AtomicU64>,
    status: mpsc::UnboundedSender<Stamped<OrderStatusMsg>>,
    open_order: mpsc::UnboundedSender<Stamped<OpenOrderMsg>>,
    execution: mpsc::UnboundedSender<Stamped<ExecutionMsg>>,
    commission: mpsc::UnboundedSender<Stamped<CommissionReportMsg>>,
    error: mpsc::UnboundedSender<Stamped<OrderErrorMsg>>,
    account: mpsc::UnboundedSender<Stamped<AccountUpdate>>,
}

impl VenueSenders {
    /// Route one event to its channel. `false` once the pump is gone.
    pub fn send(&self, event: VenueEvent) -> bool {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        match event {
            VenueEvent::Status(msg) => self.status.send((seq, msg)).is_ok(),
            VenueEvent::OpenOrder(msg) => self.open_order.send((seq, msg)).is_ok(),
            VenueEvent::Execution(msg) => self.execution.send((seq, msg)).is_ok(),
            VenueEvent::Commission(msg) => self.commission.send((seq, msg)).is_ok(),
            VenueEvent::Error(msg) => self.error.send((seq, msg)).is_ok(),
            VenueEvent::Account(update) => self.account.send((seq, update)).is_ok(),
        }
    }
}

/// Consumer half: owns the receivers and the book handle.
#[derive(Debug)]
pub struct EventPump {
    book: Arc<Mutex<LiveBook>>,
    status: mpsc::UnboundedReceiver<Stamped<OrderStatusMsg>>,
    open_order: mpsc::UnboundedReceiver<Stamped<OpenOrderMsg>>,
    execution: mpsc::UnboundedReceiver<Stamped<ExecutionMsg>>,
    commission: mpsc::UnboundedReceiver<Stamped<CommissionReportMsg>>,
    error: mpsc::UnboundedReceiver<Stamped<OrderErrorMsg>>,
    account: mpsc::UnboundedReceiver<Stamped<AccountUpdate>>,
    /// Received but not yet applied, keyed by sequence number.
    reorder: BTreeMap<u64, VenueEvent>,
}

/// Create the per-event-type channels feeding `book`.
pub fn channels(book: Arc<Mutex<LiveBook>>) -> (VenueSenders, EventPump) {
    let (status_tx, status) = mpsc::unbounded_channel();
    let (open_order_tx, open_order) = mpsc::unbounded_channel();
    let (execution_tx, execution) = mpsc::unbounded_channel();
    let (commission_tx, commission) = mpsc::unbounded_channel();
    let (error_tx, error) = mpsc::unbounded_channel();
    let (account_tx, account) = mpsc::unbounded_channel();
    (
        VenueSenders {
            seq: Arc::new(AtomicU64::new(0)),
            status: status_tx,
            open_order: open_order_tx,
            execution: execution_tx,
            commission: commission_tx,
            error: error_tx,
            account: account_tx,
        },
        EventPump {
            book,
            status,
            open_order,
            execution,
            commission,
            error,
            account,
            reorder: BTreeMap::new(),
        },
    )
}

impl EventPump {
    /// Move everything already queued on any channel into the reorder buffer.
    fn collect(&mut self) {
        while let Ok((seq, msg)) = self.status.try_recv() {
            self.reorder.insert(seq, VenueEvent::Status(msg));
        }
        while let Ok((seq, msg)) = self.open_order.try_recv() {
            self.reorder.insert(seq, VenueEvent::OpenOrder(msg));
        }
        while let Ok((seq, msg)) = self.execution.try_recv() {
            self.reorder.insert(seq, VenueEvent::Execution(msg));
        }
        while let Ok((seq, msg)) = self.commission.try_recv() {
            self.reorder.insert(seq, VenueEvent::Commission(msg));
        }
        while let Ok((seq, msg)) = self.error.try_recv() {
            self.reorder.insert(seq, VenueEvent::Error(msg));
        }
        while let Ok((seq, update)) = self.account.try_recv() {
            self.reorder.insert(seq, VenueEvent::Account(update));
        }
    }

    /// Consume events until `shutdown` fires or its sender is dropped, then
    /// apply whatever is still queued. Returns the number of events applied.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> usize {
        info!("venue event pump started");
        let mut applied = 0;
        loop {
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                debug!("venue event pump shutting down");
                break;
            }

            self.collect();
            if let Some((_, event)) = self.reorder.pop_first() {
                self.book.lock().apply(event);
                applied += 1;
                continue;
            }

            let (seq, event) = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("venue event pump shutting down");
                    break;
                }
                Some((seq, msg)) = self.status.recv() => (seq, VenueEvent::Status(msg)),
                Some((seq, msg)) = self.open_order.recv() => (seq, VenueEvent::OpenOrder(msg)),
                Some((seq, msg)) = self.execution.recv() => (seq, VenueEvent::Execution(msg)),
                Some((seq, msg)) = self.commission.recv() => (seq, VenueEvent::Commission(msg)),
                Some((seq, msg)) = self.error.recv() => (seq, VenueEvent::Error(msg)),
                Some((seq, update)) = self.account.recv() => (seq, VenueEvent::Account(update)),
                else => break,
            };
            self.reorder.insert(seq, event);
        }
        applied += self.drain();
        info!(applied, "venue event pump stopped");
        applied
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<usize> {
        tokio::spawn(self.run(shutdown))
    }

    /// Apply everything queued right now, in send order, without waiting.
    pub fn drain(&mut self) -> usize {
        self.collect();
        let events = std::mem::take(&mut self.reorder);
        let count = events.len();
        let mut book = self.book.lock();
        for event in events.into_values() {
            book.apply(event);
        }
        count
    }
}
