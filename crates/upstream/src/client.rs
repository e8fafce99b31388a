use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{
        net::TcpStream,
        sync::{Mutex as AsyncMutex, mpsc},
        time::timeout,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use neurelay_protocol::{NeuralRequest, NeuralResponse, PONG_FRAME};

use crate::{
    error::{Error, Result},
    pending::PendingRegistry,
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Fixed delay between dial attempts.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Capacity of the bounded write queue. Enqueue never blocks; a full queue
/// surfaces as backpressure instead of a stall.
const WRITE_QUEUE_CAP: usize = 256;
/// How long a cancelled write loop may spend on its parting close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Stream type returned by `tokio_tungstenite::connect_async`.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ── Connection state ─────────────────────────────────────────────────────────

/// Lifecycle of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

/// Shared connection state. The mutex guards pointer-sized fields only and
/// is never held across an await point.
struct ConnState {
    phase: Phase,
    /// Cancellation scope of the installed connection's read/write loops.
    cancel: Option<CancellationToken>,
    /// Bumped each time a connection is installed, so a reconnect trigger
    /// from an already-replaced connection can be recognized as stale.
    generation: u64,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Multiplexing client for the neural backend.
///
/// One persistent WebSocket carries every in-flight request. [`submit`]
/// registers a waiter keyed by the request UUID, enqueues the payload on
/// the bounded write queue, and awaits the correlated response or the
/// deadline. A transport failure fails all in-flight requests and triggers
/// a reconnect; the connect loop retries every 5 s until [`close`].
///
/// [`submit`]: NeuralClient::submit
/// [`close`]: NeuralClient::close
pub struct NeuralClient {
    url: String,
    timeout: Duration,

    state: Mutex<ConnState>,
    pending: PendingRegistry,

    /// Producer side of the write queue. `try_send` only.
    write_tx: mpsc::Sender<String>,
    /// Consumer side, held by the live connection's write loop.
    write_rx: AsyncMutex<mpsc::Receiver<String>>,

    /// Serializes reconnect attempts. Held for the teardown phase only,
    /// never across the redial.
    reconnect_mu: AsyncMutex<()>,

    /// Client-lifetime cancellation; parent of every per-connection scope.
    shutdown: CancellationToken,
}

impl NeuralClient {
    /// Spawn a client and its connect loop. Non-blocking: `submit` fails
    /// with `ServiceUnavailable` until the first dial succeeds.
    pub fn start(url: impl Into<String>, timeout: Duration) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAP);
        let client = Arc::new(Self {
            url: url.into(),
            timeout,
            state: Mutex::new(ConnState {
                phase: Phase::Disconnected,
                cancel: None,
                generation: 0,
            }),
            pending: PendingRegistry::new(),
            write_tx,
            write_rx: AsyncMutex::new(write_rx),
            reconnect_mu: AsyncMutex::new(()),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&client).connect_loop());
        client
    }

    /// Whether a live upstream connection is installed.
    pub fn is_ready(&self) -> bool {
        self.state().phase == Phase::Ready
    }

    /// Number of requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send one request and await its correlated response.
    pub async fn submit(&self, req: NeuralRequest) -> Result<NeuralResponse> {
        if !self.is_ready() {
            return Err(Error::ServiceUnavailable);
        }

        let payload = serde_json::to_string(&req).map_err(|e| Error::Encode(e.to_string()))?;
        let rx = self.pending.insert_unique(req.uuid)?;

        if let Err(e) = self.write_tx.try_send(payload) {
            self.pending.remove(&req.uuid);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => Error::Backpressure,
                mpsc::error::TrySendError::Closed(_) => Error::Closed,
            });
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            // Slot dropped without a value: the client is going away.
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.pending.remove(&req.uuid);
                Err(Error::Timeout)
            }
        }
    }

    /// Stop the client: cancel every loop, fail all in-flight requests,
    /// and let the write loop emit a close frame best-effort. Terminal.
    pub async fn close(&self) {
        let _guard = self.reconnect_mu.lock().await;

        let cancel = {
            let mut state = self.state();
            state.phase = Phase::Closing;
            state.cancel.take()
        };
        self.shutdown.cancel();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.pending.fail_all(&Error::Closed);
        info!("neural client closed");
    }

    fn state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Connect loop ─────────────────────────────────────────────────────────

    /// Dial until a connection is installed or the client is closed.
    async fn connect_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            match Self::connect_once(&self).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("failed to connect to neural service: {e}, retrying in 5s");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                    }
                }
            }
        }
    }

    /// One dial attempt. The connection is installed only if no other
    /// connection won the race; a redundant dial is dropped on the floor.
    async fn connect_once(client: &Arc<Self>) -> std::result::Result<(), tungstenite::Error> {
        let (ws, _) = tokio_tungstenite::connect_async(&client.url).await?;

        let cancel = client.shutdown.child_token();
        let generation = {
            let mut state = client.state();
            match state.phase {
                // Closed while dialing, or another dial already installed
                // a connection: discard this one.
                Phase::Closing | Phase::Ready => return Ok(()),
                Phase::Disconnected | Phase::Connecting => {
                    state.phase = Phase::Ready;
                    state.cancel = Some(cancel.clone());
                    state.generation += 1;
                    state.generation
                }
            }
        };

        info!(url = %client.url, "connected to neural service");

        let (sink, source) = ws.split();
        tokio::spawn(Arc::clone(client).write_loop(sink, cancel.clone(), generation));
        tokio::spawn(Arc::clone(client).read_loop(source, cancel, generation));
        Ok(())
    }

    /// Tear down the connection identified by `generation` and re-enter
    /// the connect loop. Serialized so concurrent triggers collapse into
    /// one teardown; a trigger from an already-replaced connection is
    /// stale and ignored.
    fn reconnect(
        self: Arc<Self>,
        generation: u64,
        reason: Error,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let guard = self.reconnect_mu.lock().await;

            let cancel = {
                let mut state = self.state();
                if state.phase == Phase::Closing || state.generation != generation {
                    return;
                }
                state.phase = Phase::Connecting;
                state.cancel.take()
            };
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
            self.pending.fail_all(&reason);
            warn!("neural connection lost ({reason}), reconnecting");

            drop(guard);
            self.connect_loop().await;
        })
    }

    // ── Write loop ───────────────────────────────────────────────────────────

    /// Sole writer for the connection: drains the bounded queue onto the
    /// transport. A write failure tears the connection down.
    async fn write_loop(
        self: Arc<Self>,
        mut sink: WsSink,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let mut rx = self.write_rx.lock().await;
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => return,
                },
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = sink.send(Message::Text(msg.into())) => result,
            };
            if let Err(e) = result {
                drop(rx);
                tokio::spawn(
                    Arc::clone(&self)
                        .reconnect(generation, Error::ConnectionLost(format!("write error: {e}"))),
                );
                return;
            }
        }
        // Cancelled: part with a close frame, best-effort.
        let _ = timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
    }

    // ── Read loop ────────────────────────────────────────────────────────────

    /// Sole reader for the connection: demultiplexes heartbeats to the
    /// write queue and responses to their pending slots. A read failure
    /// tears the connection down; a malformed frame does not.
    async fn read_loop(
        self: Arc<Self>,
        mut source: WsSource,
        cancel: CancellationToken,
        generation: u64,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = source.next() => next,
            };
            let reason = match next {
                Some(Ok(Message::Text(text))) => {
                    self.demux(text.as_str());
                    continue;
                }
                // Transport-level control frames: the upstream heartbeat
                // is application-level JSON, so nothing to do here.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
                Some(Ok(Message::Close(_))) | None => "connection closed by peer".to_string(),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => format!("read error: {e}"),
            };
            tokio::spawn(Arc::clone(&self).reconnect(generation, Error::ConnectionLost(reason)));
            return;
        }
    }

    /// Route one inbound frame: heartbeat, correlated response, or noise.
    fn demux(&self, text: &str) {
        let raw: serde_json::Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("unexpected message from neural service: {text}");
                return;
            }
        };

        // Heartbeat: answer through the write queue to keep the transport
        // single-writer. A full queue drops the pong; the upstream's own
        // pong deadline will then tear the connection down.
        if raw.get("type").and_then(|t| t.as_str()) == Some("ping") {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                self.write_tx.try_send(PONG_FRAME.to_string())
            {
                warn!("write queue is full, dropping pong");
            }
            return;
        }

        let resp: NeuralResponse = match serde_json::from_value(raw) {
            Ok(resp) => resp,
            Err(_) => {
                warn!("unexpected message from neural service: {text}");
                return;
            }
        };
        // Covers the empty-uuid case: nothing to correlate.
        let Ok(uuid) = Uuid::parse_str(&resp.uuid) else {
            warn!("unexpected message from neural service: {text}");
            return;
        };

        debug!(%uuid, created_at = %resp.created_at, "response from neural service");

        // Late arrivals after a timeout have no slot and are dropped here.
        if let Some(slot) = self.pending.take(&uuid) {
            let _ = slot.send(Ok(resp));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
