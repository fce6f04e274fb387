//! Live adapter against a recording mock venue: bracket placement and
//! cascades, cooperative cancel, venue refusal, position adoption, and the
//! channel pump.

use std::sync::Arc;

use brokerlab_core::broker::{
    Broker, BracketLeg, BracketOrders, BracketRequest, BrokerError, Notification, OrderRequest,
};
use brokerlab_core::domain::{OrderRef, OrderStatus, Side};
use brokerlab_live::venue::{
    AccountUpdate, CommissionReportMsg, ExecutionMsg, OrderStatusMsg, VenuePosition, VenueResult,
    VenueStatus,
};
use brokerlab_live::{
    LiveBroker, LiveConfig, VenueClient, VenueContext, VenueError, VenueEvent, VenueOrder,
    VenueOrderId,
};
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use tokio::sync::broadcast;

// ── Mock venue ───────────────────────────────────────────────────────

#[derive(Default)]
struct MockVenue {
    placed: Mutex<Vec<Vec<VenueOrder>>>,
    cancels: Mutex<Vec<VenueOrderId>>,
    positions: Vec<VenuePosition>,
    refuse: bool,
}

impl VenueClient for MockVenue {
    fn place_orders(&self, orders: &[VenueOrder]) -> VenueResult<()> {
        if self.refuse {
            return Err(VenueError::OrderRejected {
                reason: "insufficient margin".into(),
                code: Some(201),
            });
        }
        self.placed.lock().push(orders.to_vec());
        Ok(())
    }

    fn cancel_order(&self, order_id: VenueOrderId) -> VenueResult<()> {
        self.cancels.lock().push(order_id);
        Ok(())
    }

    fn positions(&self) -> VenueResult<Vec<VenuePosition>> {
        Ok(self.positions.clone())
    }

    fn account(&self) -> VenueResult<AccountUpdate> {
        Ok(AccountUpdate {
            cash: 25_000.0,
            value: 31_000.0,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 6)
        .unwrap()
        .and_hms_opt(14, 0, 0)
        .unwrap()
}

fn make_broker(venue: MockVenue) -> (LiveBroker, Arc<MockVenue>) {
    let venue = Arc::new(venue);
    let context = Arc::new(VenueContext::new(venue.clone(), 7, 1000));
    (LiveBroker::new(context, LiveConfig::default()), venue)
}

fn fill(exec_id: &str, order_id: VenueOrderId, side: Side, shares: f64, price: f64) -> VenueEvent {
    VenueEvent::Execution(ExecutionMsg {
        exec_id: exec_id.into(),
        order_id,
        side,
        shares,
        price,
        cum_qty: shares,
        time: ts(),
        leg: None,
        commission: Some(0.0),
    })
}

fn status(order_id: VenueOrderId, status: VenueStatus) -> VenueEvent {
    VenueEvent::Status(OrderStatusMsg {
        order_id,
        status,
        filled: 0.0,
    })
}

fn apply(broker: &LiveBroker, event: VenueEvent) {
    broker.book().lock().apply(event);
}

fn venue_id(broker: &LiveBroker, reference: OrderRef) -> VenueOrderId {
    broker.book().lock().venue_id(reference).unwrap()
}

fn bracket(broker: &mut LiveBroker) -> (OrderRef, OrderRef, OrderRef) {
    let BracketOrders {
        parent,
        stop_loss,
        take_profit,
    } = BracketRequest::new(Side::Buy, OrderRequest::market("ES", 1.0))
        .with_stop_loss(95.0)
        .with_take_profit(110.0)
        .submit(broker)
        .unwrap();
    (
        parent.reference,
        stop_loss.unwrap().reference,
        take_profit.unwrap().reference,
    )
}

fn status_of(broker: &LiveBroker, reference: OrderRef) -> OrderStatus {
    broker.order_status(reference).unwrap()
}

// ── Brackets ─────────────────────────────────────────────────────────

#[test]
fn bracket_is_placed_in_one_call() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);

    let placed = venue.placed.lock();
    assert_eq!(placed.len(), 1);
    let batch = &placed[0];
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].order_id, venue_id(&broker, parent));
    assert_eq!(batch[0].order_type.code(), "MKT");
    assert!(!batch[0].transmit);
    assert!(!batch[1].transmit);
    assert!(batch[2].transmit);

    assert_eq!(batch[1].order_type.code(), "STP");
    assert_eq!(batch[1].aux_price, Some(95.0));
    assert_eq!(batch[2].order_type.code(), "LMT");
    assert_eq!(batch[2].limit_price, Some(110.0));
    for child in &batch[1..] {
        assert_eq!(child.parent_id, Some(batch[0].order_id));
        assert_eq!(child.action, "SELL");
    }
    assert_eq!(batch[1].oca_group, batch[2].oca_group);
    assert_ne!(batch[0].oca_group, batch[1].oca_group);
    drop(placed);

    for r in [parent, stop, take] {
        assert_eq!(status_of(&broker, r), OrderStatus::Submitted);
    }
}

#[test]
fn parent_fill_activates_children_without_resubmission() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);

    apply(&broker, fill("e1", venue_id(&broker, parent), Side::Buy, 1.0, 100.0));

    assert_eq!(status_of(&broker, parent), OrderStatus::Completed);
    assert!(!broker.order(stop).unwrap().dormant);
    assert!(!broker.order(take).unwrap().dormant);
    assert_eq!(venue.placed.lock().len(), 1);
    assert_eq!(broker.position("ES").size, 1.0);
}

#[test]
fn child_fill_cancels_sibling_locally() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);

    apply(&broker, fill("e1", venue_id(&broker, parent), Side::Buy, 1.0, 100.0));
    apply(&broker, fill("e2", venue_id(&broker, take), Side::Sell, 1.0, 110.0));

    assert_eq!(status_of(&broker, take), OrderStatus::Completed);
    assert_eq!(status_of(&broker, stop), OrderStatus::Cancelled);
    assert_eq!(broker.position("ES").size, 0.0);
    // The venue cancels OCA siblings itself.
    assert!(venue.cancels.lock().is_empty());
}

#[test]
fn child_fill_ahead_of_parent_commission_keeps_parent_fill() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);

    let VenueEvent::Execution(mut entry) = fill("e1", venue_id(&broker, parent), Side::Buy, 1.0, 100.0)
    else {
        unreachable!()
    };
    entry.commission = None;
    apply(&broker, VenueEvent::Execution(entry));
    apply(&broker, fill("e2", venue_id(&broker, take), Side::Sell, 1.0, 110.0));

    assert_eq!(status_of(&broker, take), OrderStatus::Completed);
    assert_eq!(status_of(&broker, stop), OrderStatus::Cancelled);
    assert!(broker.order(parent).unwrap().alive());

    apply(
        &broker,
        VenueEvent::Commission(CommissionReportMsg {
            exec_id: "e1".into(),
            commission: 1.5,
            realized_pnl: None,
        }),
    );
    assert_eq!(status_of(&broker, parent), OrderStatus::Completed);
    assert_eq!(broker.order(parent).unwrap().executed.comm, 1.5);
    assert!(broker.position("ES").is_flat());
    assert_eq!(broker.book().lock().unmatched(), (0, 0));
}

#[test]
fn leg_routes_fill_reported_on_parent_id() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);
    let parent_id = venue_id(&broker, parent);

    apply(&broker, fill("e1", parent_id, Side::Buy, 1.0, 100.0));
    let VenueEvent::Execution(mut stop_fill) = fill("e2", parent_id, Side::Sell, 1.0, 95.0) else {
        unreachable!()
    };
    stop_fill.leg = Some(BracketLeg::StopLoss);
    apply(&broker, VenueEvent::Execution(stop_fill));

    assert_eq!(status_of(&broker, stop), OrderStatus::Completed);
    assert_eq!(status_of(&broker, take), OrderStatus::Cancelled);
    assert_eq!(broker.order(stop).unwrap().executed.price, 95.0);
}

#[test]
fn venue_cancel_of_parent_cascades_to_children() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let (parent, stop, take) = bracket(&mut broker);

    apply(&broker, status(venue_id(&broker, parent), VenueStatus::Cancelled));

    for r in [parent, stop, take] {
        assert_eq!(status_of(&broker, r), OrderStatus::Cancelled);
    }
}

#[test]
fn orphan_child_is_rejected() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let order = broker.sell(OrderRequest::stop("ES", 1.0, 90.0).with_parent(OrderRef(77))).unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(venue.placed.lock().is_empty());
}

// ── Submission and cancel ────────────────────────────────────────────

#[test]
fn duplicate_submit_is_refused() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let order = broker.create_order(Side::Buy, OrderRequest::limit("ES", 1.0, 99.0));
    broker.submit(order.clone()).unwrap();
    assert!(matches!(
        broker.submit(order),
        Err(BrokerError::DuplicateSubmit(_))
    ));
}

#[test]
fn cancel_is_cooperative() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let order = broker.buy(OrderRequest::limit("ES", 1.0, 99.0)).unwrap();
    let id = venue_id(&broker, order.reference);
    apply(&broker, status(id, VenueStatus::Submitted));

    assert!(broker.cancel(order.reference).unwrap());
    assert_eq!(*venue.cancels.lock(), vec![id]);
    assert_eq!(status_of(&broker, order.reference), OrderStatus::Accepted);

    apply(&broker, status(id, VenueStatus::Cancelled));
    assert_eq!(status_of(&broker, order.reference), OrderStatus::Cancelled);
    assert!(!broker.cancel(order.reference).unwrap());
    assert!(matches!(
        broker.cancel(OrderRef(4242)),
        Err(BrokerError::UnknownOrder(_))
    ));
}

#[test]
fn venue_refusal_rejects_and_reports() {
    let (mut broker, _venue) = make_broker(MockVenue {
        refuse: true,
        ..MockVenue::default()
    });
    let order = broker.create_order(Side::Buy, OrderRequest::market("ES", 1.0));
    let reference = order.reference;
    assert!(matches!(broker.submit(order), Err(BrokerError::Venue(_))));
    assert_eq!(status_of(&broker, reference), OrderStatus::Rejected);

    let statuses: Vec<OrderStatus> = std::iter::from_fn(|| broker.get_notification())
        .filter_map(|n| match n {
            Notification::Order(o) => Some(o.status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![OrderStatus::Submitted, OrderStatus::Rejected]);
}

#[test]
fn oco_order_shares_sibling_oca_group() {
    let (mut broker, venue) = make_broker(MockVenue::default());
    let first = broker.buy(OrderRequest::limit("ES", 1.0, 95.0)).unwrap();
    broker
        .buy(OrderRequest::stop("ES", 1.0, 105.0).with_oco(first.reference))
        .unwrap();

    let placed = venue.placed.lock();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0][0].oca_group, placed[1][0].oca_group);
}

#[test]
fn oco_sibling_cancelled_when_one_fills() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let first = broker.buy(OrderRequest::limit("ES", 1.0, 95.0)).unwrap();
    let second = broker
        .buy(OrderRequest::stop("ES", 1.0, 105.0).with_oco(first.reference))
        .unwrap();

    apply(&broker, fill("e1", venue_id(&broker, first.reference), Side::Buy, 1.0, 95.0));
    assert_eq!(status_of(&broker, first.reference), OrderStatus::Completed);
    assert_eq!(status_of(&broker, second.reference), OrderStatus::Cancelled);
}

// ── Account and positions ────────────────────────────────────────────

#[test]
fn start_adopts_venue_positions() {
    let (mut broker, _venue) = make_broker(MockVenue {
        positions: vec![
            VenuePosition {
                symbol: "ES".into(),
                size: 2.0,
                price: 4000.0,
            },
            VenuePosition {
                symbol: "NQ".into(),
                size: 0.0,
                price: 0.0,
            },
            VenuePosition {
                symbol: "CL".into(),
                size: -1.0,
                price: 80.0,
            },
        ],
        ..MockVenue::default()
    });
    broker.start().unwrap();

    assert_eq!(broker.cash(), 25_000.0);
    assert_eq!(broker.value(None), 31_000.0);
    assert_eq!(broker.position("ES").size, 2.0);
    assert_eq!(broker.position("CL").price, 80.0);
    assert!(broker.position("NQ").is_flat());

    let completed = std::iter::from_fn(|| broker.get_notification())
        .filter(|n| matches!(n, Notification::Order(o) if o.status == OrderStatus::Completed))
        .count();
    assert_eq!(completed, 2);
}

#[test]
fn start_without_use_positions_only_loads_account() {
    let venue = Arc::new(MockVenue {
        positions: vec![VenuePosition {
            symbol: "ES".into(),
            size: 2.0,
            price: 4000.0,
        }],
        ..MockVenue::default()
    });
    let context = Arc::new(VenueContext::new(venue, 7, 1));
    let config = LiveConfig {
        use_positions: false,
        ..LiveConfig::default()
    };
    let mut broker = LiveBroker::new(context, config);
    broker.start().unwrap();

    assert_eq!(broker.cash(), 25_000.0);
    assert!(broker.position("ES").is_flat());
    assert!(broker.get_notification().is_none());
}

#[test]
fn next_closes_the_cycle() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    broker.buy(OrderRequest::market("ES", 1.0)).unwrap();
    broker.next().unwrap();

    let notes: Vec<Notification> = std::iter::from_fn(|| broker.get_notification()).collect();
    assert!(matches!(notes.last(), Some(Notification::Boundary)));
    assert!(matches!(&notes[0], Notification::Order(o) if o.status == OrderStatus::Submitted));
}

// ── Event pump ───────────────────────────────────────────────────────

#[tokio::test]
async fn pump_applies_queued_events_and_stops_on_shutdown() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let order = broker.buy(OrderRequest::market("ES", 2.0)).unwrap();
    let id = venue_id(&broker, order.reference);

    let (senders, pump) = broker.event_channels();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    assert!(senders.send(status(id, VenueStatus::Submitted)));
    let VenueEvent::Execution(mut execution) = fill("e1", id, Side::Buy, 2.0, 50.0) else {
        unreachable!()
    };
    execution.commission = None;
    assert!(senders.send(VenueEvent::Execution(execution)));
    assert!(senders.send(VenueEvent::Commission(CommissionReportMsg {
        exec_id: "e1".into(),
        commission: 4.0,
        realized_pnl: None,
    })));
    shutdown_tx.send(()).unwrap();

    let applied = pump.spawn(shutdown_rx).await.unwrap();
    assert_eq!(applied, 3);

    let executed = broker.order(order.reference).unwrap();
    assert_eq!(executed.status, OrderStatus::Completed);
    assert_eq!(executed.executed.comm, 4.0);
    assert_eq!(broker.position("ES").size, 2.0);
    assert_eq!(broker.book().lock().unmatched(), (0, 0));
}

#[tokio::test]
async fn pump_applies_events_in_send_order_across_channels() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let order = broker.buy(OrderRequest::market("ES", 2.0)).unwrap();
    let id = venue_id(&broker, order.reference);

    let (senders, pump) = broker.event_channels();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = pump.spawn(shutdown_rx);

    assert!(senders.send(status(id, VenueStatus::Submitted)));
    assert!(senders.send(fill("e1", id, Side::Buy, 1.0, 50.0)));
    tokio::task::yield_now().await;
    shutdown_tx.send(()).unwrap();
    assert_eq!(handle.await.unwrap(), 2);

    let notified: Vec<OrderStatus> = std::iter::from_fn(|| broker.get_notification())
        .filter_map(|n| match n {
            Notification::Order(o) => Some(o.status),
            _ => None,
        })
        .collect();
    assert_eq!(
        notified,
        vec![OrderStatus::Submitted, OrderStatus::Accepted, OrderStatus::Partial]
    );
    let partial = broker.order(order.reference).unwrap();
    assert_eq!(partial.status, OrderStatus::Partial);
    assert_eq!(partial.executed.size, 1.0);
}

#[test]
fn late_submitted_status_does_not_regress_a_partial_fill() {
    let (mut broker, _venue) = make_broker(MockVenue::default());
    let order = broker.buy(OrderRequest::market("ES", 2.0)).unwrap();
    let id = venue_id(&broker, order.reference);

    apply(&broker, fill("e1", id, Side::Buy, 1.0, 50.0));
    apply(&broker, status(id, VenueStatus::Submitted));
    assert_eq!(status_of(&broker, order.reference), OrderStatus::Partial);
}

#[tokio::test]
async fn pump_stops_when_shutdown_sender_dropped() {
    let (broker, _venue) = make_broker(MockVenue::default());
    let (senders, pump) = broker.event_channels();
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let handle = pump.spawn(shutdown_rx);
    assert!(senders.send(VenueEvent::Account(AccountUpdate {
        cash: 1.0,
        value: 2.0,
    })));
    drop(shutdown_tx);

    assert_eq!(handle.await.unwrap(), 1);
    assert_eq!(broker.cash(), 1.0);
}

#[tokio::test]
async fn senders_report_a_stopped_pump() {
    let (broker, _venue) = make_broker(MockVenue::default());
    let (senders, pump) = broker.event_channels();
    drop(pump);
    assert!(!senders.send(status(1, VenueStatus::Submitted)));
}
