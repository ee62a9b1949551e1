//! Local delivery fanout shared by the broadcast strategies.
//!
//! Every strategy owns a [`Fanout`]: an ordered list of receivers that are
//! awaited strictly sequentially per delivered payload, so a slow receiver
//! applies backpressure to the ones registered after it.

use {
    crate::error::Result,
    async_trait::async_trait,
    parking_lot::Mutex,
    serde_json::Value,
    std::{future::Future, pin::Pin, sync::Arc},
};

/// Future returned by a delivery handler.
pub type DeliveryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked for every locally delivered payload.
pub type DeliveryHandler = Arc<dyn Fn(Value) -> DeliveryFuture + Send + Sync>;

/// Wrap an async closure into a [`DeliveryHandler`].
pub fn delivery_handler<F, Fut>(f: F) -> DeliveryHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// A broadcast strategy: submit a payload for delivery at every member and
/// register local receivers for delivered payloads.
#[async_trait]
pub trait Broadcast: Send + Sync {
    /// Submit a payload to all members (including the local node).
    async fn broadcast(&self, message: Value) -> Result<()>;

    /// Append a receiver to the local delivery fanout.
    fn add_receiver(&self, receiver: DeliveryHandler);
}

/// Ordered receiver list with strictly sequential delivery.
#[derive(Default)]
pub struct Fanout {
    receivers: Mutex<Vec<DeliveryHandler>>,
}

impl Fanout {
    /// Create an empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a receiver; it will observe every payload delivered after
    /// this call.
    pub fn add_receiver(&self, receiver: DeliveryHandler) {
        self.receivers.lock().push(receiver);
    }

    /// Number of registered receivers.
    pub fn len(&self) -> usize {
        self.receivers.lock().len()
    }

    /// Returns true when no receiver is registered.
    pub fn is_empty(&self) -> bool {
        self.receivers.lock().is_empty()
    }

    /// Deliver a payload to every receiver in registration order, awaiting
    /// each before invoking the next.
    ///
    /// The list is snapshotted up front so a receiver may register further
    /// receivers mid-delivery without invalidating the iteration; additions
    /// take effect from the next delivery.
    pub async fn deliver(&self, message: &Value) {
        let snapshot: Vec<DeliveryHandler> = self.receivers.lock().clone();
        for receiver in snapshot {
            receiver(message.clone()).await;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
