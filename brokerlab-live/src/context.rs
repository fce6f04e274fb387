//! Connection-scoped venue context.
//!
//! Holds what every adapter on one venue connection shares: the client, the
//! client id, and the order-id and OCA-group allocators. It is created at
//! startup and handed to the adapter explicitly; its lifetime is the run's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use crate::venue::{VenueClient, VenueOrderId};

pub struct VenueContext {
    client: Arc<dyn VenueClient>,
    client_id: i32,
    next_order_id: AtomicU64,
    next_oca: AtomicU64,
}

impl VenueContext {
    /// `first_order_id` is the next valid id announced by the venue on connect.
    pub fn new(client: Arc<dyn VenueClient>, client_id: i32, first_order_id: VenueOrderId) -> Self {
        Self {
            client,
            client_id,
            next_order_id: AtomicU64::new(first_order_id),
            next_oca: AtomicU64::new(1),
        }
    }

    pub fn client(&self) -> &dyn VenueClient {
        self.client.as_ref()
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn next_order_id(&self) -> VenueOrderId {
        self.next_order_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Fresh one-cancels-all group name, unique on this connection.
    pub fn new_oca_group(&self) -> String {
        let n = self.next_oca.fetch_add(1, Ordering::SeqCst);
        format!("oca-{}-{}", self.client_id, n)
    }

    /// Wall-clock timestamp used to stamp live orders.
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

impl std::fmt::Debug for VenueContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueContext")
            .field("client_id", &self.client_id)
            .field("next_order_id", &self.next_order_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
