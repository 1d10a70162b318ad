//! Reconnecting socket transport.
//!
//! One [`Transport`] owns at most one logical connection per session. The
//! socket itself runs on a background task; the handle side only touches the
//! shared outbound queue, the subscriber table, and the link-state watch.
//!
//! Lifecycle: `Disconnected → Connecting → Open → (Closing) → Disconnected`,
//! re-entering `Connecting` automatically with capped exponential backoff
//! (2→4→8→16→30s) unless [`Transport::shutdown`] tore the link down. While
//! `Open`, a `{"type":"ping"}` probe goes out every [`PING_INTERVAL`]; if no
//! pong arrives within [`PONG_TIMEOUT`] the link is force-closed so the
//! reconnect path can take over.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::ChatError;
use crate::protocol::{ClientEnvelope, ServerEvent, classify};
use crate::session::Credential;

/// How often a liveness probe is sent while the link is open.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);
/// How long to wait for a pong before force-closing the link.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(45);

const BACKOFF_BASE_MS: u64 = 2_000;
const BACKOFF_CAP_MS: u64 = 30_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Connection lifecycle state, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// What happened to an envelope handed to [`Transport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the open link for immediate transmission.
    Sent,
    /// Link not open; parked in the outbound queue, flushed FIFO on open.
    Queued,
    /// Liveness probes are never queued; a ping while closed is discarded.
    Dropped,
}

pub type SubscriberId = u64;

/// Backoff delay before reconnect attempt `attempt` (0-based):
/// `min(30s, 2s * 2^attempt)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}

/// State shared between the handle and the socket task.
struct Shared {
    state: watch::Sender<LinkState>,
    /// Outbound queue. Unbounded; prolonged disconnection grows it without
    /// limit.
    queue: Mutex<VecDeque<ClientEnvelope>>,
    wakeup: Notify,
    subscribers: Mutex<Vec<(SubscriberId, mpsc::UnboundedSender<ServerEvent>)>>,
    next_subscriber: AtomicU64,
}

impl Shared {
    /// Deliver an event to every live subscriber. A subscriber whose
    /// receiver is gone is pruned and never blocks delivery to the rest.
    fn fanout(&self, event: ServerEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|(id, tx)| {
            if tx.send(event.clone()).is_ok() {
                true
            } else {
                tracing::debug!(subscriber = id, "pruning closed subscriber");
                false
            }
        });
    }
}

/// Handle to the socket. Owns the background task; dropping the handle
/// aborts the task.
pub struct Transport {
    endpoint: Url,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<LinkState>,
    credential: Option<Credential>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create a transport for a socket endpoint (`ws://` or `wss://`).
    /// No connection is attempted until [`connect`](Self::connect).
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, ChatError> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(Shared {
            state: state_tx,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
        });
        Ok(Self {
            endpoint,
            shared,
            state_rx,
            credential: None,
            shutdown_tx: None,
            task: None,
        })
    }

    /// Start (or keep) the connection for a credential.
    ///
    /// A no-op while the link is already running with the same credential.
    /// A different credential tears the running link down and replaces it;
    /// queued envelopes survive the swap.
    pub fn connect(&mut self, credential: Credential) {
        let running = self.task.as_ref().is_some_and(|t| !t.is_finished());
        if running && self.credential.as_ref() == Some(&credential) {
            return;
        }
        self.abort_task();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoint.clone();
        let cred = credential.clone();
        self.credential = Some(credential);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(run_link(endpoint, cred, shared, shutdown_rx)));
    }

    /// Hand an envelope to the link. Never blocks; see [`SendOutcome`].
    pub fn send(&self, envelope: ClientEnvelope) -> SendOutcome {
        let open = self.state() == LinkState::Open;
        if !open && envelope.is_ping() {
            return SendOutcome::Dropped;
        }
        self.shared.queue.lock().push_back(envelope);
        self.shared.wakeup.notify_one();
        if open { SendOutcome::Sent } else { SendOutcome::Queued }
    }

    /// Register an observer. Every classified inbound event (pongs excluded)
    /// is delivered to every live subscriber.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.shared.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for link-state transitions.
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Number of envelopes parked in the outbound queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Tear the link down for good: cancel reconnect and liveness timers,
    /// close the socket, and clear the outbound queue without flushing it.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.shared.queue.lock().clear();
        self.credential = None;
        let _ = self.shared.state.send(LinkState::Disconnected);
    }

    fn abort_task(&mut self) {
        self.shutdown_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Why one open session ended.
#[derive(Debug)]
enum CloseReason {
    Shutdown,
    Eof,
    Error,
    PingTimeout,
}

/// Connect-drive-backoff loop. Runs until shutdown.
async fn run_link(
    endpoint: Url,
    credential: Credential,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        let _ = shared.state.send(LinkState::Connecting);
        let url = endpoint_with_token(&endpoint, &credential);

        tokio::select! {
            result = connect_async(url.as_str()) => match result {
                Ok((socket, _response)) => {
                    attempt = 0;
                    let _ = shared.state.send(LinkState::Open);
                    tracing::debug!(host = endpoint.host_str().unwrap_or(""), "link open");
                    let reason = drive(socket, &shared, &mut shutdown).await;
                    let _ = shared.state.send(LinkState::Disconnected);
                    if matches!(reason, CloseReason::Shutdown) {
                        return;
                    }
                    tracing::debug!(?reason, "link closed");
                }
                Err(error) => {
                    let _ = shared.state.send(LinkState::Disconnected);
                    tracing::warn!(%error, attempt, "connect failed");
                }
            },
            _ = shutdown.changed() => {
                let _ = shared.state.send(LinkState::Disconnected);
                return;
            }
        }

        let delay = backoff_delay(attempt);
        attempt += 1;
        tracing::debug!(delay_ms = delay.as_millis() as u64, attempt, "scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Drive one open socket session until it closes. Flushes the outbound
/// queue on entry, then multiplexes inbound frames, queued sends, liveness
/// probes, and the shutdown signal.
async fn drive(
    socket: WsStream,
    shared: &Arc<Shared>,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseReason {
    let (mut sink, mut stream) = socket.split();

    if let Err(reason) = flush_queue(&mut sink, shared).await {
        return reason;
    }

    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = shared.state.send(LinkState::Closing);
                let _ = sink.send(WsMessage::Close(None)).await;
                return CloseReason::Shutdown;
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match classify(&text) {
                    Some(ServerEvent::Pong) => {
                        last_pong = Instant::now();
                    }
                    Some(ServerEvent::Unrecognized) | None => {
                        // Unrecognized shapes are logged by the classifier;
                        // unparseable frames are dropped without a word.
                    }
                    Some(event) => shared.fanout(event),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = sink.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => return CloseReason::Eof,
                Some(Err(error)) => {
                    tracing::debug!(%error, "socket error");
                    return CloseReason::Error;
                }
                Some(Ok(_)) => {}
            },
            _ = shared.wakeup.notified() => {
                if let Err(reason) = flush_queue(&mut sink, shared).await {
                    return reason;
                }
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::warn!("pong timeout, forcing reconnect");
                    return CloseReason::PingTimeout;
                }
                if write_frame(&mut sink, &ClientEnvelope::Ping).await.is_err() {
                    return CloseReason::Error;
                }
            }
        }
    }
}

/// Drain the outbound queue FIFO onto the sink. A failed write puts the
/// envelope back at the front so nothing is lost across the reconnect.
async fn flush_queue(sink: &mut WsSink, shared: &Arc<Shared>) -> Result<(), CloseReason> {
    loop {
        let next = shared.queue.lock().pop_front();
        let Some(envelope) = next else {
            return Ok(());
        };
        if let Err(error) = write_frame(sink, &envelope).await {
            tracing::debug!(%error, "send failed, requeueing");
            shared.queue.lock().push_front(envelope);
            return Err(CloseReason::Error);
        }
    }
}

async fn write_frame(
    sink: &mut WsSink,
    envelope: &ClientEnvelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match serde_json::to_string(envelope) {
        Ok(text) => sink.send(WsMessage::Text(text)).await,
        Err(error) => {
            tracing::error!(%error, "unserializable envelope dropped");
            Ok(())
        }
    }
}

/// Attach the bearer credential as a `token` query parameter.
fn endpoint_with_token(endpoint: &Url, credential: &Credential) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("token", credential.as_str());
    url
}
