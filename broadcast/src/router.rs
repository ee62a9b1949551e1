//! Cached payload router.
//!
//! Wraps a broadcast strategy and demultiplexes delivered payloads to
//! per-target receivers.  Applications address a replica by an opaque
//! target reference; two separately constructed references with equal
//! fields name the same receiver, because targets are compared by canonical
//! serialization rather than identity.
//!
//! When a payload arrives for a target with no registered receiver, the
//! router asks its [`ReplicaFactory`] to materialize the replica.  The
//! factory is expected to call back into [`CachedRouter::add_receiver_for`]
//! while it constructs the replica — the router is mid-delivery at that
//! point, so its receiver map is never iterated across the re-entrant
//! registration.

use {
    crate::{
        dispatch::{delivery_handler, Broadcast, DeliveryHandler},
        error::{BroadcastError, Result},
        fingerprint::canonical_string,
    },
    log::{debug, error},
    parking_lot::Mutex,
    serde_json::{json, Value},
    std::{
        collections::HashMap,
        sync::{Arc, Weak},
    },
};

/// Materializes a replica the first time a payload arrives for an unknown
/// target.  Implementations own their type store and replica cache; the
/// router only requires that construction registers a receiver for the
/// target on the given router.
pub trait ReplicaFactory: Send + Sync {
    /// Create the replica addressed by `target`, registering its receiver
    /// via [`CachedRouter::add_receiver_for`].
    fn create_from_reference(&self, target: &Value, router: &CachedRouter);
}

/// Demultiplexes broadcast deliveries to at most one receiver per target.
pub struct CachedRouter {
    dispatcher: Arc<dyn Broadcast>,
    factory: Box<dyn ReplicaFactory>,
    receivers: Mutex<HashMap<String, DeliveryHandler>>,
}

impl CachedRouter {
    /// Create a router over a dispatcher and hook it into the dispatcher's
    /// delivery fanout.
    pub fn new(dispatcher: Arc<dyn Broadcast>, factory: Box<dyn ReplicaFactory>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let this = weak.clone();
            dispatcher.add_receiver(delivery_handler(move |payload| {
                let this = this.clone();
                async move {
                    if let Some(router) = this.upgrade() {
                        if let Err(e) = router.handle_delivery(payload) {
                            error!("router delivery failed: {e}");
                        }
                    }
                }
            }));

            Self {
                dispatcher: dispatcher.clone(),
                factory,
                receivers: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Register the unique local receiver for a target.
    ///
    /// Registering a second receiver for the same target is a programmer
    /// error and fails with [`BroadcastError::DuplicateReceiver`].
    pub fn add_receiver_for(&self, target: &Value, receiver: DeliveryHandler) -> Result<()> {
        let key = canonical_string(target)?;
        let mut receivers = self.receivers.lock();
        if receivers.contains_key(&key) {
            return Err(BroadcastError::DuplicateReceiver(key));
        }
        debug!("router: receiver registered for target {key}");
        receivers.insert(key, receiver);
        Ok(())
    }

    /// Broadcast a payload addressed to `target` through the underlying
    /// dispatcher.
    pub async fn send_message_to(&self, target: &Value, message: Value) -> Result<()> {
        self.dispatcher
            .broadcast(json!({ "target": target, "message": message }))
            .await
    }

    /// Route one delivered payload to its target's receiver, materializing
    /// the replica on first contact.  The receiver itself runs
    /// fire-and-forget.
    fn handle_delivery(&self, payload: Value) -> Result<()> {
        let annotated = payload.as_object();
        let (Some(target), Some(message)) =
            annotated.map_or((None, None), |object| (object.get("target"), object.get("message")))
        else {
            debug!("router: delivery without target/message dropped");
            return Ok(());
        };

        let key = canonical_string(target)?;
        let receiver = self.receivers.lock().get(&key).cloned();
        let receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                debug!("router: materializing replica for target {key}");
                self.factory.create_from_reference(target, self);
                self.receivers
                    .lock()
                    .get(&key)
                    .cloned()
                    .ok_or(BroadcastError::ReceiverMissing(key))?
            }
        };

        tokio::spawn(receiver(message.clone()));
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
