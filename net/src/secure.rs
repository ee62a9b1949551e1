//! Encrypted point-to-point network.
//!
//! Same contract as the plain [`TcpNetwork`](crate::network::TcpNetwork),
//! with peers authenticated against public keys read from disk and every
//! steady-state frame encrypted under a per-connection AES-256 session key.
//!
//! ## Handshake
//!
//! The initiator I connects to the responder R and the two exchange one
//! RSA-wrapped frame each:
//!
//! 1. I → R: `[selfId, nonce]` under R's public key (nonce is a fresh UUID).
//! 2. R → I: `[nonce, aesKey]` under I's public key.  Only the genuine
//!    holder of I's private key can recover the session key — this is the
//!    transport's sender authentication.
//! 3. I verifies the echoed nonce; a mismatch tears the connection down for
//!    a fresh attempt.  On a match, messages buffered for the peer are
//!    flushed in order.
//! 4. Steady state, both directions of a connection: frame body is
//!    `IV(16) || AES-256-CBC(JSON [topic, payload])` with a fresh random IV
//!    per frame.
//!
//! RSA plaintext is split into portions of `modulus_bytes − 45`; each
//! portion is encrypted separately and the ciphertext portions are joined
//! with the same decimal-length framing used on the outer stream.

use {
    crate::{
        config::NetConfig,
        error::{NetError, Result},
        frame::{encode_frame, FrameDecoder},
        keys,
        membership::{NodeId, Peer},
        network::{Network, TopicHandler},
    },
    aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    async_trait::async_trait,
    base64::{engine::general_purpose::STANDARD as BASE64, Engine},
    log::{debug, error, info, warn},
    parking_lot::Mutex,
    rand::RngCore,
    rsa::{traits::PublicKeyParts, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey},
    serde_json::{json, Value},
    std::{
        collections::HashMap,
        net::SocketAddr,
        path::{Path, PathBuf},
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
    uuid::Uuid,
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 session key.
type SessionKey = [u8; 32];

/// Bytes of RSA overhead left unused in every plaintext portion.
const RSA_PORTION_OVERHEAD: usize = 45;

/// Where to find the local private key and each peer's public key.
pub struct KeyLocator {
    private_key_path: PathBuf,
    public_key_path: Box<dyn Fn(&NodeId) -> PathBuf + Send + Sync>,
}

impl KeyLocator {
    /// Build a locator from the private key path and a resolver mapping a
    /// node id to its public key file.
    pub fn new(
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Fn(&NodeId) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        Self {
            private_key_path: private_key_path.into(),
            public_key_path: Box::new(public_key_path),
        }
    }

    /// Path of the local node's private key.
    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    /// Path of a peer's public key.
    pub fn public_key_path(&self, id: &NodeId) -> PathBuf {
        (self.public_key_path)(id)
    }
}

// ── RSA chunking ────────────────────────────────────────────────────────────

/// Encrypt `plaintext` under `key`, splitting it into portions of
/// `modulus_bytes − 45` and joining the ciphertext portions with inner
/// decimal-length framing.
pub fn rsa_encrypt_chunked(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let portion_len = key.size().saturating_sub(RSA_PORTION_OVERHEAD).max(1);
    let mut wire = Vec::new();
    for portion in plaintext.chunks(portion_len) {
        let ciphertext = key
            .encrypt(&mut rng, Pkcs1v15Encrypt, portion)
            .map_err(|e| NetError::Crypto(format!("rsa encrypt: {e}")))?;
        wire.extend_from_slice(&encode_frame(&ciphertext));
    }
    Ok(wire)
}

/// Reverse [`rsa_encrypt_chunked`]: split the inner frames, decrypt each
/// portion, and concatenate the plaintext.
pub fn rsa_decrypt_chunked(key: &RsaPrivateKey, wire: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = FrameDecoder::new(key.size());
    let portions = decoder.push(wire)?;
    if decoder.pending() != 0 {
        return Err(NetError::Crypto(format!(
            "truncated rsa portion: {} stray bytes",
            decoder.pending()
        )));
    }
    let mut plaintext = Vec::new();
    for portion in portions {
        let slice = key
            .decrypt(Pkcs1v15Encrypt, &portion)
            .map_err(|e| NetError::Crypto(format!("rsa decrypt: {e}")))?;
        plaintext.extend_from_slice(&slice);
    }
    Ok(plaintext)
}

// ── AES framing ─────────────────────────────────────────────────────────────

/// Encrypt a frame body: fresh random IV prepended to the CBC ciphertext.
pub fn aes_encrypt_frame(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| NetError::Crypto(format!("aes key setup: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut body = Vec::with_capacity(iv.len() + ciphertext.len());
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

/// Decrypt a frame body produced by [`aes_encrypt_frame`].
pub fn aes_decrypt_frame(key: &SessionKey, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < 16 || (body.len() - 16) % 16 != 0 {
        return Err(NetError::Crypto(format!(
            "malformed aes frame of {} bytes",
            body.len()
        )));
    }
    let (iv, ciphertext) = body.split_at(16);
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| NetError::Crypto(format!("aes key setup: {e}")))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| NetError::Crypto(format!("aes decrypt: {e}")))
}

fn encrypted_message_frame(key: &SessionKey, topic: &str, payload: &Value) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(&json!([topic, payload]))?;
    Ok(encode_frame(&aes_encrypt_frame(key, &plaintext)?))
}

// ── Shared state ────────────────────────────────────────────────────────────

struct SecureOutbound {
    tx: mpsc::Sender<(String, Value)>,
    task: JoinHandle<()>,
}

struct SecureShared {
    local_id: NodeId,
    config: NetConfig,
    private_key: RsaPrivateKey,
    public_keys: Mutex<HashMap<NodeId, RsaPublicKey>>,
    handlers: Mutex<HashMap<String, TopicHandler>>,
    outbound: Mutex<HashMap<NodeId, SecureOutbound>>,
    reader_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SecureShared {
    async fn dispatch(&self, topic: &str, from: NodeId, payload: Value) {
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

/// The encrypted stream-socket transport.
pub struct SecureNetwork {
    shared: Arc<SecureShared>,
    locator: KeyLocator,
    local_addr: SocketAddr,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl SecureNetwork {
    /// Load the local private key, bind the listener, and start accepting
    /// connections.
    pub async fn bind(local_id: NodeId, config: NetConfig, locator: KeyLocator) -> Result<Arc<Self>> {
        config.validate()?;
        let private_key = keys::load_private_key(locator.private_key_path())?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("{local_id}: listening (encrypted) on {local_addr}");

        let shared = Arc::new(SecureShared {
            local_id,
            config,
            private_key,
            public_keys: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            outbound: Mutex::new(HashMap::new()),
            reader_tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });

        let accept_shared = shared.clone();
        let listener_task = tokio::spawn(accept_loop(listener, accept_shared));

        Ok(Arc::new(Self {
            shared,
            locator,
            local_addr,
            listener_task: Mutex::new(Some(listener_task)),
        }))
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Network for SecureNetwork {
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

        // Read the peer's public key eagerly so a misconfigured key file
        // fails registration instead of the first send.
        let public_key = keys::load_public_key(&self.locator.public_key_path(&id))?;
        self.shared
            .public_keys
            .lock()
            .insert(id.clone(), public_key.clone());

        let (tx, rx) = mpsc::channel(self.shared.config.max_pending_messages);
        let task = tokio::spawn(write_secure_peer(
            self.shared.clone(),
            id.clone(),
            peer,
            public_key,
            rx,
        ));
        let prior = self
            .shared
            .outbound
            .lock()
            .insert(id.clone(), SecureOutbound { tx, task });
        if let Some(prior) = prior {
            debug!("{}: replacing outbound session with {id}", self.shared.local_id);
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

        let tx = self
            .shared
            .outbound
            .lock()
            .get(target)
            .map(|peer| peer.tx.clone())
            .ok_or_else(|| NetError::UnknownPeer(target.clone()))?;
        match tx.try_send((topic.to_string(), payload)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "{}: outbound queue to {target} full, dropping message on topic {topic}",
                    self.shared.local_id
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NetError::ChannelClosed(target.clone()))
            }
        }
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

// ── Inbound side ────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Arc<SecureShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("{}: accepted connection from {addr}", shared.local_id);
                let task = tokio::spawn(read_secure_connection(stream, addr, shared.clone()));
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

async fn read_secure_connection(mut stream: TcpStream, addr: SocketAddr, shared: Arc<SecureShared>) {
    let mut decoder = FrameDecoder::new(shared.config.max_frame_bytes);
    let mut session: Option<(NodeId, SessionKey)> = None;
    let mut chunk = [0u8; 4_096];

    'read: loop {
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
            match &session {
                None => {
                    let Some((peer_id, key, response)) = begin_session(&shared, &body, addr)
                    else {
                        // A connection that cannot complete the handshake
                        // will never carry a valid frame.
                        break 'read;
                    };
                    if let Err(e) = stream.write_all(&response).await {
                        warn!(
                            "{}: key exchange reply to {peer_id} failed: {e}",
                            shared.local_id
                        );
                        break 'read;
                    }
                    info!("{}: session with {peer_id} established", shared.local_id);
                    session = Some((peer_id, key));
                }
                Some((peer_id, key)) => {
                    let plaintext = match aes_decrypt_frame(key, &body) {
                        Ok(plaintext) => plaintext,
                        Err(e) => {
                            // Keep the connection: one bad frame is noise,
                            // not a broken session.
                            warn!(
                                "{}: decryption failure from {peer_id}: {e}, frame dropped",
                                shared.local_id
                            );
                            continue;
                        }
                    };
                    let Ok(value) = serde_json::from_slice::<Value>(&plaintext) else {
                        warn!(
                            "{}: undecodable frame from {peer_id}, dropped",
                            shared.local_id
                        );
                        continue;
                    };
                    let parsed = value.as_array().and_then(|entries| {
                        if entries.len() == 2 {
                            entries[0].as_str().map(|topic| (topic.to_string(), entries[1].clone()))
                        } else {
                            None
                        }
                    });
                    let Some((topic, payload)) = parsed else {
                        warn!(
                            "{}: frame from {peer_id} is not a [topic, payload] pair, dropped",
                            shared.local_id
                        );
                        continue;
                    };
                    shared.dispatch(&topic, peer_id.clone(), payload).await;
                }
            }
        }
    }

    debug!("{}: connection from {addr} closed", shared.local_id);
}

/// Responder half of the handshake: decrypt `[senderId, nonce]`, mint a
/// session key, and build the `[nonce, aesKey]` reply under the announced
/// sender's public key.
fn begin_session(
    shared: &SecureShared,
    body: &[u8],
    addr: SocketAddr,
) -> Option<(NodeId, SessionKey, Vec<u8>)> {
    let plaintext = match rsa_decrypt_chunked(&shared.private_key, body) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!("{}: handshake from {addr} undecryptable: {e}", shared.local_id);
            return None;
        }
    };
    let value: Value = serde_json::from_slice(&plaintext).ok()?;
    let entries = value.as_array()?;
    if entries.len() != 2 {
        warn!("{}: malformed handshake from {addr}", shared.local_id);
        return None;
    }
    let peer_id = NodeId::from(entries[0].as_str()?);
    let nonce = entries[1].as_str()?;

    let Some(peer_key) = shared.public_keys.lock().get(&peer_id).cloned() else {
        warn!(
            "{}: handshake from unregistered peer {peer_id}, dropping connection",
            shared.local_id
        );
        return None;
    };

    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    let reply = serde_json::to_vec(&json!([nonce, BASE64.encode(key)])).ok()?;
    let wrapped = match rsa_encrypt_chunked(&peer_key, &reply) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            warn!("{}: key exchange encryption for {peer_id} failed: {e}", shared.local_id);
            return None;
        }
    };
    Some((peer_id, key, encode_frame(&wrapped)))
}

// ── Outbound side ───────────────────────────────────────────────────────────

async fn write_secure_peer(
    shared: Arc<SecureShared>,
    id: NodeId,
    peer: Peer,
    peer_key: RsaPublicKey,
    mut rx: mpsc::Receiver<(String, Value)>,
) {
    let mut backoff_ms = shared.config.reconnect_base_ms;
    // A message whose write failed mid-session; resent first after the next
    // handshake so ordering is preserved.
    let mut carry: Option<(String, Value)> = None;

    'reconnect: loop {
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }

        let Some((mut stream, session_key)) =
            establish_session(&shared, &id, &peer, &peer_key).await
        else {
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(shared.config.reconnect_max_ms);
            continue;
        };
        backoff_ms = shared.config.reconnect_base_ms;
        info!("{}: session with {id} established", shared.local_id);

        if let Some((topic, payload)) = carry.take() {
            match encrypted_message_frame(&session_key, &topic, &payload) {
                Ok(frame) => {
                    if let Err(e) = stream.write_all(&frame).await {
                        warn!("{}: resend to {id} failed: {e}", shared.local_id);
                        carry = Some((topic, payload));
                        continue;
                    }
                }
                Err(e) => warn!(
                    "{}: failed to encrypt message for {id}: {e}, dropped",
                    shared.local_id
                ),
            }
        }

        loop {
            match rx.recv().await {
                Some((topic, payload)) => {
                    match encrypted_message_frame(&session_key, &topic, &payload) {
                        Ok(frame) => {
                            if let Err(e) = stream.write_all(&frame).await {
                                warn!(
                                    "{}: send to {id} failed: {e}, reconnecting",
                                    shared.local_id
                                );
                                carry = Some((topic, payload));
                                continue 'reconnect;
                            }
                        }
                        Err(e) => warn!(
                            "{}: failed to encrypt message for {id}: {e}, dropped",
                            shared.local_id
                        ),
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

/// Initiator half of the handshake.  Returns the connected stream and the
/// session key, or `None` after logging the failure.
async fn establish_session(
    shared: &SecureShared,
    id: &NodeId,
    peer: &Peer,
    peer_key: &RsaPublicKey,
) -> Option<(TcpStream, SessionKey)> {
    let mut stream = match TcpStream::connect(peer.address()).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(
                "{}: connect to {id} at {} failed: {e}",
                shared.local_id,
                peer.address()
            );
            return None;
        }
    };

    let nonce = Uuid::new_v4().to_string();
    let hello = serde_json::to_vec(&json!([shared.local_id.as_str(), nonce])).ok()?;
    let wrapped = match rsa_encrypt_chunked(peer_key, &hello) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            warn!("{}: handshake encryption for {id} failed: {e}", shared.local_id);
            return None;
        }
    };
    if let Err(e) = stream.write_all(&encode_frame(&wrapped)).await {
        warn!("{}: handshake send to {id} failed: {e}", shared.local_id);
        return None;
    }

    let Some(response) = read_single_frame(&mut stream, shared.config.max_frame_bytes).await
    else {
        warn!(
            "{}: connection to {id} closed before key exchange",
            shared.local_id
        );
        return None;
    };

    let plaintext = match rsa_decrypt_chunked(&shared.private_key, &response) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!("{}: key exchange from {id} undecryptable: {e}", shared.local_id);
            return None;
        }
    };
    let value: Value = serde_json::from_slice(&plaintext).ok()?;
    let entries = value.as_array()?;
    if entries.len() != 2 {
        warn!("{}: malformed key exchange from {id}", shared.local_id);
        return None;
    }
    let echoed_nonce = entries[0].as_str()?;
    if echoed_nonce != nonce {
        warn!(
            "{}: key exchange nonce mismatch from {id}, tearing down",
            shared.local_id
        );
        return None;
    }
    let key_bytes = BASE64.decode(entries[1].as_str()?).ok()?;
    let session_key: SessionKey = key_bytes.try_into().ok()?;

    Some((stream, session_key))
}

/// Read frames until the first complete one arrives.
async fn read_single_frame(stream: &mut TcpStream, max_frame_bytes: usize) -> Option<Vec<u8>> {
    let mut decoder = FrameDecoder::new(max_frame_bytes);
    let mut chunk = [0u8; 4_096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        let mut frames = decoder.push(&chunk[..n]).ok()?;
        if !frames.is_empty() {
            return Some(frames.remove(0));
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
