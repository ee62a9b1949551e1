//! Byzantine-fault-tolerant reliable broadcast.
//!
//! Implements the Bracha three-phase protocol: initial → echo → ready.
//! With `n` members and `f = ⌊(n − 1) / 3⌋`, the strategy guarantees, as
//! long as at most `f` members are Byzantine:
//!
//! - **Validity** — a broadcast by a correct sender is eventually delivered
//!   by every correct member.
//! - **No duplication** — every correct member delivers at most once per
//!   message fingerprint.
//! - **Integrity** — a delivered message attributed to a correct sender was
//!   actually broadcast by it.
//! - **Consistency** — no two correct members deliver different payloads
//!   for the same fingerprint.
//!
//! The per-fingerprint transition logic is a pure state machine
//! ([`BrachaCore`]): given an event it mutates bookkeeping and returns which
//! protocol messages to emit and whether to deliver.  All I/O happens in the
//! async shell after the state lock is released.
//!
//! Message identity is the fingerprint `(uuid, sha256(content))`, so an
//! equivocating sender that reuses a UUID for different payloads produces
//! distinct fingerprints — neither can reach a quorum from honest members.

use {
    crate::{
        dispatch::{Broadcast, DeliveryHandler, Fanout},
        error::Result,
        fingerprint::message_fingerprint,
    },
    async_trait::async_trait,
    log::{debug, warn},
    parking_lot::Mutex,
    replicast_net::{topic_handler, Membership, Network, NodeId},
    serde_json::Value,
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Weak},
    },
    uuid::Uuid,
};

/// Topic carrying `[uuid, payload]` from the original sender.
pub const INITIAL_TOPIC: &str = "initial";
/// Topic carrying `[uuid, payload, originator]` echoes.
pub const ECHO_TOPIC: &str = "echo";
/// Topic carrying `[uuid, payload, originator]` readies.
pub const READY_TOPIC: &str = "ready";

// ── Pure state machine ──────────────────────────────────────────────────────

/// Protocol bookkeeping for one fingerprint.
///
/// The three flags are set-once and gate their side effects.  Sender sets
/// are released as soon as their phase can no longer matter: `echo_senders`
/// once our own ready is out, `ready_senders` once the message is accepted.
#[derive(Debug)]
struct MessageState {
    echo_sent: bool,
    ready_sent: bool,
    accepted: bool,
    echo_senders: Option<HashSet<NodeId>>,
    ready_senders: Option<HashSet<NodeId>>,
}

impl MessageState {
    fn new() -> Self {
        Self {
            echo_sent: false,
            ready_sent: false,
            accepted: false,
            echo_senders: Some(HashSet::new()),
            ready_senders: Some(HashSet::new()),
        }
    }
}

/// Result of processing one protocol event.
#[derive(Debug, Default, PartialEq, Eq)]
struct StepOutput {
    /// Emit our own echo for this fingerprint to every member.
    send_echo: bool,
    /// Emit our own ready for this fingerprint to every member.
    send_ready: bool,
    /// Deliver the payload locally (happens at most once per fingerprint).
    deliver: bool,
}

/// The deterministic core of the protocol.  Given the same sequence of
/// events it always produces the same transitions; networking is handled
/// by the surrounding [`ReliableBroadcast`].
struct BrachaCore {
    n: usize,
    f: usize,
    states: HashMap<String, MessageState>,
}

impl BrachaCore {
    fn new(member_count: usize, faulty_tolerance: usize) -> Self {
        Self {
            n: member_count,
            f: faulty_tolerance,
            states: HashMap::new(),
        }
    }

    fn state_mut(&mut self, fingerprint: &str) -> &mut MessageState {
        self.states
            .entry(fingerprint.to_string())
            .or_insert_with(MessageState::new)
    }

    /// An `initial` arrived: enter the echo path for its fingerprint.
    fn on_initial(&mut self, fingerprint: &str) -> StepOutput {
        let state = self.state_mut(fingerprint);
        let mut output = StepOutput::default();
        if !state.echo_sent {
            state.echo_sent = true;
            output.send_echo = true;
        }
        output
    }

    /// An `echo` from `from` arrived for this fingerprint.
    fn on_echo(&mut self, fingerprint: &str, from: &NodeId) -> StepOutput {
        let (n, f) = (self.n, self.f);
        let state = self.state_mut(fingerprint);
        if let Some(senders) = state.echo_senders.as_mut() {
            senders.insert(from.clone());
        }
        Self::evaluate(state, n, f)
    }

    /// A `ready` from `from` arrived for this fingerprint.
    fn on_ready(&mut self, fingerprint: &str, from: &NodeId) -> StepOutput {
        let (n, f) = (self.n, self.f);
        let state = self.state_mut(fingerprint);
        if let Some(senders) = state.ready_senders.as_mut() {
            senders.insert(from.clone());
        }
        Self::evaluate(state, n, f)
    }

    /// Apply the readiness and acceptance conditions to a state.
    ///
    /// Readiness (`|ready| ≥ f + 1` or `2·|echo| > n + f`) emits our own
    /// echo and ready; acceptance (`|ready| ≥ 2f + 1`) delivers.  A late
    /// event re-entering a condition performs no duplicate side effect.
    fn evaluate(state: &mut MessageState, n: usize, f: usize) -> StepOutput {
        let mut output = StepOutput::default();
        let echoes = state.echo_senders.as_ref().map_or(0, HashSet::len);
        let readies = state.ready_senders.as_ref().map_or(0, HashSet::len);

        if readies >= f + 1 || 2 * echoes > n + f {
            if !state.echo_sent {
                state.echo_sent = true;
                output.send_echo = true;
            }
            if !state.ready_sent {
                state.ready_sent = true;
                output.send_ready = true;
                // The quorum argument only consults ready counts from here
                // on; the echo set can be released.
                state.echo_senders = None;
            }
        }

        if readies >= 2 * f + 1 && !state.accepted {
            state.accepted = true;
            state.ready_senders = None;
            output.deliver = true;
        }
        output
    }
}

// ── Shape predicates ────────────────────────────────────────────────────────

/// `[uuid, payload]` as carried on the initial topic.
fn as_message_with_id(value: &Value) -> Option<(&str, &Value)> {
    let entries = value.as_array()?;
    if entries.len() != 2 {
        return None;
    }
    Some((entries[0].as_str()?, &entries[1]))
}

/// `[uuid, payload, originator]` as carried on the echo and ready topics.
fn as_annotated_message(value: &Value) -> Option<(&str, &Value, &str)> {
    let entries = value.as_array()?;
    if entries.len() != 3 {
        return None;
    }
    Some((entries[0].as_str()?, &entries[1], entries[2].as_str()?))
}

// ── Async shell ─────────────────────────────────────────────────────────────

/// Bracha reliable broadcast over a [`Network`].
pub struct ReliableBroadcast {
    network: Arc<dyn Network>,
    members: Vec<NodeId>,
    core: Mutex<BrachaCore>,
    fanout: Arc<Fanout>,
}

impl ReliableBroadcast {
    /// Create the strategy and hook its three topic receivers into the
    /// network.
    pub fn new(network: Arc<dyn Network>, membership: &Membership) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let this = weak.clone();
            network.register_receiver(
                INITIAL_TOPIC,
                topic_handler(move |from, body| {
                    let this = this.clone();
                    async move {
                        if let Some(strategy) = this.upgrade() {
                            strategy.handle_initial(from, body).await;
                        }
                    }
                }),
            );
            let this = weak.clone();
            network.register_receiver(
                ECHO_TOPIC,
                topic_handler(move |from, body| {
                    let this = this.clone();
                    async move {
                        if let Some(strategy) = this.upgrade() {
                            strategy.handle_echo(from, body).await;
                        }
                    }
                }),
            );
            let this = weak.clone();
            network.register_receiver(
                READY_TOPIC,
                topic_handler(move |from, body| {
                    let this = this.clone();
                    async move {
                        if let Some(strategy) = this.upgrade() {
                            strategy.handle_ready(from, body).await;
                        }
                    }
                }),
            );

            Self {
                members: membership.ids().cloned().collect(),
                core: Mutex::new(BrachaCore::new(
                    membership.len(),
                    membership.faulty_tolerance(),
                )),
                fanout: Arc::new(Fanout::new()),
                network,
            }
        })
    }

    async fn handle_initial(&self, from: NodeId, body: Value) {
        let Some((uuid, payload)) = as_message_with_id(&body) else {
            debug!("{}: malformed initial dropped", self.network.local_id());
            return;
        };
        // Promote to the annotated form: the first receiver pins the
        // originator into the message content.
        let annotated = Value::Array(vec![
            Value::String(uuid.to_string()),
            payload.clone(),
            Value::String(from.as_str().to_string()),
        ]);
        let Ok(fingerprint) = message_fingerprint(uuid, &annotated) else {
            debug!("{}: unhashable initial dropped", self.network.local_id());
            return;
        };
        let output = self.core.lock().on_initial(&fingerprint);
        self.apply(output, &annotated).await;
    }

    async fn handle_echo(&self, from: NodeId, body: Value) {
        let Some((uuid, _, _)) = as_annotated_message(&body) else {
            debug!("{}: malformed echo dropped", self.network.local_id());
            return;
        };
        let Ok(fingerprint) = message_fingerprint(uuid, &body) else {
            debug!("{}: unhashable echo dropped", self.network.local_id());
            return;
        };
        let output = self.core.lock().on_echo(&fingerprint, &from);
        self.apply(output, &body).await;
    }

    async fn handle_ready(&self, from: NodeId, body: Value) {
        let Some((uuid, _, _)) = as_annotated_message(&body) else {
            debug!("{}: malformed ready dropped", self.network.local_id());
            return;
        };
        let Ok(fingerprint) = message_fingerprint(uuid, &body) else {
            debug!("{}: unhashable ready dropped", self.network.local_id());
            return;
        };
        let output = self.core.lock().on_ready(&fingerprint, &from);
        self.apply(output, &body).await;
    }

    /// Perform the sends and the delivery a state step asked for.  Runs
    /// with the state lock released, so re-entrant self-sends are safe.
    async fn apply(&self, output: StepOutput, annotated: &Value) {
        if output.send_echo {
            self.send_to_all(ECHO_TOPIC, annotated).await;
        }
        if output.send_ready {
            self.send_to_all(READY_TOPIC, annotated).await;
        }
        if output.deliver {
            if let Some((_, payload, originator)) = as_annotated_message(annotated) {
                debug!(
                    "{}: accepted broadcast originated by {originator}",
                    self.network.local_id()
                );
                let payload = payload.clone();
                self.fanout.deliver(&payload).await;
            }
        }
    }

    async fn send_to_all(&self, topic: &str, body: &Value) {
        for member in &self.members {
            if let Err(e) = self.network.send_message(member, topic, body.clone()).await {
                warn!(
                    "{}: {topic} to {member} failed: {e}",
                    self.network.local_id()
                );
            }
        }
    }
}

#[async_trait]
impl Broadcast for ReliableBroadcast {
    async fn broadcast(&self, message: Value) -> Result<()> {
        let uuid = Uuid::new_v4().to_string();
        let body = Value::Array(vec![Value::String(uuid), message]);
        // Self receives the same initial as everyone else and walks the
        // normal echo/ready path, delivering to itself exactly once.
        self.send_to_all(INITIAL_TOPIC, &body).await;
        Ok(())
    }

    fn add_receiver(&self, receiver: DeliveryHandler) {
        self.fanout.add_receiver(receiver);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
