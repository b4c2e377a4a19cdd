//! WebSocket progress stream for observers
//!
//! Observers subscribe to the live progress feed, optionally filtered to one
//! session via `?session_id=`. The stream is one-way: client messages other
//! than close are ignored. A slow observer that lags the broadcast buffer
//! skips events rather than stalling publishers.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub session_id: Option<String>,
}

pub async fn handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.session_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.progress.subscribe());

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            event = events.next() => {
                match event {
                    Some(Ok(event)) => {
                        if let Some(id) = &filter {
                            if id != &event.session_id {
                                continue;
                            }
                        }
                        let text = match serde_json::to_string(&event) {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::error!("Failed to serialize progress event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!("observer lagged, skipped {} events", skipped);
                    }
                    None => break,
                }
            }
        }
    }
}
