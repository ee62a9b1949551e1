//! Plain TCP network with topic-based demultiplexing.
//!
//! Delivers every message sent between correct peers exactly once to the
//! receiver registered for its topic, backed by reliable stream semantics
//! while connections are up.  Each node keeps exactly one outbound socket
//! per peer; inbound connections identify their sender with a declaration
//! frame on the reserved `senderId` pseudo-topic.
//!
//! **This transport does not authenticate senders** — the declaration frame
//! is trusted as-is, so the plain network must be treated as unsafe on a
//! hostile network.  [`crate::secure::SecureNetwork`] provides the
//! authenticated sibling with the same contract.
//!
//! ## Wire format
//!
//! Frames are length-prefixed (see [`crate::frame`]); each body is the UTF-8
//! JSON encoding of `[topic, payload]`.  A topic that itself ends in
//! `"senderId"` is prefixed with one underscore on send and has one stripped
//! on receive, so application topics can never be mistaken for the
//! declaration frame.

use {
    crate::{
        config::NetConfig,
        error::{NetError, Result},
        frame::{encode_frame, FrameDecoder},
        membership::{NodeId, Peer},
    },
    async_trait::async_trait,
    log::{debug, error, info, warn},
    parking_lot::Mutex,
    serde_json::{json, Value},
    std::{
        collections::HashMap,
        future::Future,
        net::SocketAddr,
        pin::Pin,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinHandle,
    },
};

/// Reserved pseudo-topic carried by the first frame of every inbound
/// connection, declaring the sender's id.  Must not be used by higher
/// layers.
pub const SENDER_ID_TOPIC: &str = "senderId";

/// Future returned by a topic handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked for every message received on a topic.
pub type TopicHandler = Arc<dyn Fn(NodeId, Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`TopicHandler`].
pub fn topic_handler<F, Fut>(f: F) -> TopicHandler
where
    F: Fn(NodeId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |from, payload| Box::pin(f(from, payload)))
}

/// Point-to-point message transport with per-topic receivers.
///
/// Implemented by [`TcpNetwork`] (plain) and
/// [`crate::secure::SecureNetwork`] (RSA-handshaked, AES-encrypted); the
/// broadcast strategies work against this trait and are oblivious to which
/// transport carries them.
#[async_trait]
pub trait Network: Send + Sync {
    /// The local node's id.
    fn local_id(&self) -> &NodeId;

    /// Connect (or reconnect) the outbound side for a peer.  Any previous
    /// outbound socket to the same id is torn down first.  Registering the
    /// local id is a no-op.
    async fn register_node(&self, id: NodeId, peer: Peer) -> Result<()>;

    /// Install the receiver for a topic, replacing any prior handler.
    fn register_receiver(&self, topic: &str, handler: TopicHandler);

    /// Send a payload to `target` on `topic`.  A send to the local id
    /// invokes the local receiver in place.
    async fn send_message(&self, target: &NodeId, topic: &str, payload: Value) -> Result<()>;

    /// Stop the network: close the listener, drop every connection, and
    /// suppress reconnection.
    async fn stop(&self);
}

/// Per-peer delivery counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    /// Messages handed to this peer's outbound queue.
    pub sent: u64,
    /// Messages dispatched from this peer.
    pub received: u64,
}

// ── Plain TCP implementation ────────────────────────────────────────────────

struct OutboundPeer {
    tx: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

struct Shared {
    local_id: NodeId,
    config: NetConfig,
    handlers: Mutex<HashMap<String, TopicHandler>>,
    outbound: Mutex<HashMap<NodeId, OutboundPeer>>,
    stats: Mutex<HashMap<NodeId, PeerStats>>,
    reader_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Shared {
    async fn dispatch(&self, topic: &str, from: NodeId, payload: Value) {
        self.stats.lock().entry(from.clone()).or_default().received += 1;
        let handler = self.handlers.lock().get(topic).cloned();
        match handler {
            Some(handler) => handler(from, payload).await,
            None => debug!(
                "{}: no receiver registered for topic {topic}, dropping message from {from}",
                self.local_id
            ),
        }
    }
}

/// The unencrypted stream-socket transport.
pub struct TcpNetwork {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpNetwork {
    /// Bind the listener and start accepting connections.
    pub async fn bind(local_id: NodeId, config: NetConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("{local_id}: listening on {local_addr}");

        let shared = Arc::new(Shared {
            local_id,
            config,
            handlers: Mutex::new(HashMap::new()),
            outbound: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            reader_tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });

        let accept_shared = shared.clone();
        let listener_task = tokio::spawn(accept_loop(listener, accept_shared));

        Ok(Arc::new(Self {
            shared,
            local_addr,
            listener_task: Mutex::new(Some(listener_task)),
        }))
    }

    /// The address the listener is actually bound to (useful when the
    /// configured port is 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Delivery counters for a peer, if any traffic has been exchanged.
    pub fn peer_stats(&self, id: &NodeId) -> Option<PeerStats> {
        self.shared.stats.lock().get(id).copied()
    }
}

#[async_trait]
impl Network for TcpNetwork {
    fn local_id(&self) -> &NodeId {
        &self.shared.local_id
    }

    async fn register_node(&self, id: NodeId, peer: Peer) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(NetError::Stopped);
        }
        if id == self.shared.local_id {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.shared.config.channel_buffer_size);
        let task = tokio::spawn(write_peer(self.shared.clone(), id.clone(), peer, rx));
        let prior = self
            .shared
            .outbound
            .lock()
            .insert(id.clone(), OutboundPeer { tx, task });
        if let Some(prior) = prior {
            debug!("{}: replacing outbound connection to {id}", self.shared.local_id);
            prior.task.abort();
        }
        Ok(())
    }

    fn register_receiver(&self, topic: &str, handler: TopicHandler) {
        self.shared.handlers.lock().insert(topic.to_string(), handler);
    }

    async fn send_message(&self, target: &NodeId, topic: &str, payload: Value) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(NetError::Stopped);
        }

        if *target == self.shared.local_id {
            let handler = self.shared.handlers.lock().get(topic).cloned();
            match handler {
                Some(handler) => handler(self.shared.local_id.clone(), payload).await,
                None => debug!(
                    "{}: no local receiver for topic {topic}",
                    self.shared.local_id
                ),
            }
            return Ok(());
        }

        let body = serde_json::to_vec(&json!([escape_topic(topic), payload]))?;
        let frame = encode_frame(&body);
        let tx = self
            .shared
            .outbound
            .lock()
            .get(target)
            .map(|peer| peer.tx.clone())
            .ok_or_else(|| NetError::UnknownPeer(target.clone()))?;
        tx.send(frame)
            .await
            .map_err(|_| NetError::ChannelClosed(target.clone()))?;
        self.shared.stats.lock().entry(target.clone()).or_default().sent += 1;
        Ok(())
    }

    async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{}: stopping", self.shared.local_id);
        if let Some(task) = self.listener_task.lock().take() {
            task.abort();
        }
        for (_, peer) in self.shared.outbound.lock().drain() {
            peer.task.abort();
        }
        for task in self.shared.reader_tasks.lock().drain(..) {
            task.abort();
        }
    }
}

// ── Topic escaping ──────────────────────────────────────────────────────────

/// Escape an application topic so it can never collide with the sender
/// declaration: topics ending in `"senderId"` gain one leading underscore.
fn escape_topic(topic: &str) -> String {
    if topic.ends_with(SENDER_ID_TOPIC) {
        format!("_{topic}")
    } else {
        topic.to_string()
    }
}

/// Reverse [`escape_topic`] on the receiving side.
fn unescape_topic(topic: &str) -> &str {
    if topic.ends_with(SENDER_ID_TOPIC) {
        topic.strip_prefix('_').unwrap_or(topic)
    } else {
        topic
    }
}

// ── Inbound side ────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("{}: accepted connection from {addr}", shared.local_id);
                let task = tokio::spawn(read_connection(stream, addr, shared.clone()));
                let mut readers = shared.reader_tasks.lock();
                readers.retain(|task| !task.is_finished());
                readers.push(task);
            }
            Err(e) => {
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                error!("{}: accept error: {e}", shared.local_id);
            }
        }
    }
}

async fn read_connection(mut stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) {
    let mut decoder = FrameDecoder::new(shared.config.max_frame_bytes);
    let mut sender: Option<NodeId> = None;
    let mut chunk = [0u8; 4_096];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{}: read error from {addr}: {e}", shared.local_id);
                break;
            }
        };

        let frames = match decoder.push(&chunk[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("{}: dropping connection from {addr}: {e}", shared.local_id);
                break;
            }
        };

        for body in frames {
            handle_frame(&shared, &mut sender, &body, addr).await;
        }
    }

    debug!("{}: connection from {addr} closed", shared.local_id);
}

async fn handle_frame(
    shared: &Shared,
    sender: &mut Option<NodeId>,
    body: &[u8],
    addr: SocketAddr,
) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}: undecodable frame from {addr}: {e}", shared.local_id);
            return;
        }
    };

    let parsed = value.as_array().and_then(|entries| {
        if entries.len() == 2 {
            entries[0].as_str().map(|topic| (topic, &entries[1]))
        } else {
            None
        }
    });
    let Some((topic, payload)) = parsed else {
        warn!(
            "{}: frame from {addr} is not a [topic, payload] pair, dropping",
            shared.local_id
        );
        return;
    };

    if topic == SENDER_ID_TOPIC {
        match payload.as_str() {
            Some(id) => {
                debug!("{}: connection from {addr} is {id}", shared.local_id);
                *sender = Some(NodeId::from(id));
            }
            None => warn!(
                "{}: sender declaration from {addr} is not a string, ignoring",
                shared.local_id
            ),
        }
        return;
    }

    let Some(from) = sender.clone() else {
        warn!(
            "{}: frame on topic {topic} from {addr} before sender declaration, dropping",
            shared.local_id
        );
        return;
    };

    shared
        .dispatch(unescape_topic(topic), from, payload.clone())
        .await;
}

// ── Outbound side ───────────────────────────────────────────────────────────

async fn write_peer(
    shared: Arc<Shared>,
    id: NodeId,
    peer: Peer,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    let announce = match serde_json::to_vec(&json!([SENDER_ID_TOPIC, shared.local_id.as_str()])) {
        Ok(body) => encode_frame(&body),
        Err(e) => {
            error!("{}: failed to encode sender declaration: {e}", shared.local_id);
            return;
        }
    };

    let mut backoff_ms = shared.config.reconnect_base_ms;
    // A frame whose write failed mid-connection; resent first after reconnect.
    let mut carry: Option<Vec<u8>> = None;

    'reconnect: loop {
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }

        let mut stream = match TcpStream::connect(peer.address()).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(
                    "{}: connect to {id} at {} failed: {e}, retrying in {backoff_ms}ms",
                    shared.local_id,
                    peer.address()
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(shared.config.reconnect_max_ms);
                continue;
            }
        };
        backoff_ms = shared.config.reconnect_base_ms;
        info!("{}: connected to {id} at {}", shared.local_id, peer.address());

        if let Err(e) = stream.write_all(&announce).await {
            warn!("{}: sender declaration to {id} failed: {e}", shared.local_id);
            continue;
        }

        if let Some(frame) = carry.take() {
            if let Err(e) = stream.write_all(&frame).await {
                warn!("{}: resend to {id} failed: {e}, reconnecting", shared.local_id);
                carry = Some(frame);
                continue;
            }
        }

        loop {
            match rx.recv().await {
                Some(frame) => {
                    if let Err(e) = stream.write_all(&frame).await {
                        warn!("{}: send to {id} failed: {e}, reconnecting", shared.local_id);
                        carry = Some(frame);
                        continue 'reconnect;
                    }
                }
                None => {
                    debug!("{}: outbound queue to {id} closed", shared.local_id);
                    return;
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
