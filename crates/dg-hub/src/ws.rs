//! # WebSocket Query Streaming
//!
//! The streaming query path. The first client text frame carries the same
//! request JSON the REST endpoint takes; the server answers with
//! `{"type":"batch",...}` frames followed by one `{"type":"complete",...}`.
//!
//! The engine runs on a blocking thread and writes into a bounded channel
//! ([`ChannelSink`]); the socket task drains it. A client that disconnects
//! mid-stream closes the channel, the sink stops reporting itself alive,
//! and the engine aborts without a completion frame — exactly the
//! sink-liveness contract the executor checks before every flush.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use dg_query::ResultSink;

use crate::api::QueryRequest;
use crate::AppState;

/// Frames streamed to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Batch { events: Vec<String>, seqs: Vec<i64> },
    Complete { status: i32, total: i64 },
    Error { message: String },
}

/// Bridges the synchronous engine to the socket task. Bounded, so a slow
/// client backpressures the engine instead of buffering without limit.
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn alive(&self) -> bool {
        !self.tx.is_closed()
    }

    fn on_batch(&mut self, rows: Vec<String>, seqs: Vec<i64>) {
        let _ = self.tx.blocking_send(Frame::Batch {
            events: rows,
            seqs,
        });
    }

    fn on_complete(&mut self, status: i32, total: i64) {
        let _ = self.tx.blocking_send(Frame::Complete { status, total });
    }
}

pub async fn ws_query(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The first text frame is the request.
    let request: QueryRequest = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(request) => break request,
                Err(error) => {
                    let frame = Frame::Error {
                        message: format!("bad query request: {error}"),
                    };
                    if let Ok(text) = serde_json::to_string(&frame) {
                        let _ = ws_tx.send(Message::Text(text)).await;
                    }
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };

    let query_id = Uuid::new_v4().to_string();
    tracing::info!(query_id, rules = request.rules.len(), "ws query accepted");

    let (tx, mut rx) = mpsc::channel::<Frame>(8);
    let engine = state.engine.clone();
    let store = state.store.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink::new(tx);
        engine.run(&*store, &request.argument, &request.rules, &mut sink)
    });

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    let done = matches!(frame, Frame::Complete { .. });
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(_) => break,
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    if done {
                        break;
                    }
                }
                None => break,
            },
            // Watch for the client going away mid-stream.
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    // Dropping the receiver marks the sink dead for the engine.
    drop(rx);

    match worker.await {
        Ok(report) => tracing::info!(
            query_id,
            status = report.status,
            transported = report.transported,
            completed = report.completed,
            "ws query finished"
        ),
        Err(error) => tracing::warn!(query_id, %error, "ws query worker panicked"),
    }
}
