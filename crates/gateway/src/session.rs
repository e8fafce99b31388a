//! Per-client WebSocket session: heartbeat-driven liveness plus the
//! prompt pipeline.
//!
//! Each upgraded connection runs three cooperating tasks sharing only a
//! bounded outbound channel and a cancellation token: a write task that
//! owns the sink (the connection's single writer), a ping task, and the
//! read loop driving the pipeline. Frames from one client are handled
//! strictly in arrival order.

use std::time::Duration;

use {
    axum::{
        body::Bytes,
        extract::ws::{Message, WebSocket},
    },
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{
        sync::mpsc,
        time::{Instant, interval, timeout, timeout_at},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use neurelay_protocol::{ErrorFrame, NeuralRequest, Request, WsBotMessage};

use crate::server::AppState;

// ── Liveness ─────────────────────────────────────────────────────────────────

/// Heartbeat periods for one client connection. The daemon uses the
/// defaults; tests shorten them.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Interval between server-sent pings.
    pub ping_period: Duration,
    /// Read deadline, refreshed on each client pong.
    pub pong_wait: Duration,
    /// Per-frame write deadline.
    pub write_deadline: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(15),
            pong_wait: Duration::from_secs(20),
            write_deadline: Duration::from_secs(5),
        }
    }
}

/// Outbound frames queued per client. The pipeline awaits queue space
/// rather than dropping replies.
const OUTBOUND_BUFFER: usize = 64;

// ── Session ──────────────────────────────────────────────────────────────────

/// Drive one upgraded client connection until it dies.
pub async fn run(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, "client connected");

    let (sink, stream) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let cancel = CancellationToken::new();

    let write = tokio::spawn(write_loop(
        sink,
        frames_rx,
        cancel.clone(),
        state.timeouts.write_deadline,
    ));
    let ping = tokio::spawn(ping_loop(
        frames_tx.clone(),
        cancel.clone(),
        state.timeouts.ping_period,
    ));

    read_loop(stream, frames_tx, &state, cancel.clone(), conn_id).await;

    cancel.cancel();
    let _ = ping.await;
    let _ = write.await;
    info!(%conn_id, "client disconnected");
}

/// Sole writer for the connection. Applies the write deadline to every
/// frame; a failed or overdue write cancels the whole session.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    deadline: Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        match timeout(deadline, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("client write failed: {e}");
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!("client write missed its deadline, closing");
                cancel.cancel();
                return;
            }
        }
    }
}

/// Send a transport-level ping every `period`. Write failures are
/// detected (and the session cancelled) by the write loop.
async fn ping_loop(frames: mpsc::Sender<Message>, cancel: CancellationToken, period: Duration) {
    let mut ticker = interval(period);
    ticker.tick().await; // consume the immediate first tick
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if frames.send(Message::Ping(Bytes::from_static(b"ping"))).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Read frames until deadline expiry, transport failure, or cancellation.
/// The deadline is refreshed only by pongs, so a peer that stops
/// acknowledging pings is dropped even if it keeps sending data.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    frames: mpsc::Sender<Message>,
    state: &AppState,
    cancel: CancellationToken,
    conn_id: Uuid,
) {
    let mut deadline = Instant::now() + state.timeouts.pong_wait;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout_at(deadline, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                info!(%conn_id, "client missed its pong deadline");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(%conn_id, "client read error: {e}");
                return;
            }
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Pong(_) => {
                deadline = Instant::now() + state.timeouts.pong_wait;
            }
            Message::Text(text) => handle_frame(text.as_str(), &frames, state, conn_id).await,
            Message::Close(_) => return,
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// The per-prompt pipeline. A failing step reports to the client and
/// leaves the session open; only transport failures tear it down.
async fn handle_frame(
    text: &str,
    frames: &mpsc::Sender<Message>,
    state: &AppState,
    conn_id: Uuid,
) {
    // 1. Decode. Malformed JSON is logged and dropped.
    let request: Request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            warn!(%conn_id, "dropping malformed frame: {e}");
            return;
        }
    };

    // 2. Validate the identifiers.
    let Ok(chat_uuid) = Uuid::parse_str(&request.chat_uuid) else {
        send_json(frames, &ErrorFrame::validation("chat_uuid must be uuid")).await;
        return;
    };
    let Ok(user_message_uuid) = Uuid::parse_str(&request.uuid) else {
        send_json(frames, &ErrorFrame::validation("uuid must be uuid")).await;
        return;
    };

    // 3. Persist the user turn before talking to the backend, so a crash
    //    mid-pipeline never loses the prompt.
    if let Err(e) = state
        .messages
        .insert_user_message(chat_uuid, user_message_uuid, &request.message)
        .await
    {
        warn!(%conn_id, %chat_uuid, "user turn insert failed: {e}");
        send_json(frames, &ErrorFrame::db(e.to_string())).await;
        return;
    }

    // 4. One synchronous upstream round trip on behalf of this frame.
    let response = match state
        .upstream
        .submit(NeuralRequest {
            uuid: user_message_uuid,
            model_name: request.model_name,
            message: request.message,
        })
        .await
    {
        Ok(response) => response,
        Err(e) => {
            send_json(frames, &ErrorFrame::neural(e.to_string())).await;
            return;
        }
    };

    // 5. Persist the bot turn under a fresh UUID.
    let bot_message_uuid = Uuid::new_v4();
    if let Err(e) = state
        .messages
        .insert_bot_message(chat_uuid, bot_message_uuid, &response.response, user_message_uuid)
        .await
    {
        warn!(%conn_id, %chat_uuid, "bot turn insert failed: {e}");
        send_json(frames, &ErrorFrame::db(e.to_string())).await;
        return;
    }

    // 6. Reply.
    send_json(
        frames,
        &WsBotMessage::new(
            chat_uuid,
            user_message_uuid,
            bot_message_uuid,
            response.response,
            response.created_at,
        ),
    )
    .await;
}

async fn send_json<T: serde::Serialize>(frames: &mpsc::Sender<Message>, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            let _ = frames.send(Message::Text(json.into())).await;
        }
        Err(e) => warn!("failed to encode outbound frame: {e}"),
    }
}
