//! WebSocket push channel.
//!
//! One socket may join any number of sessions. Each join subscribes an
//! mpsc sender to the broadcaster and replies with the session's last known
//! status; the socket loop then forwards envelopes as they arrive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use wsm::SubscriptionHandle;
use wsm::protocol::{EventEnvelope, PushClientMessage, PushServerMessage};

use super::AppState;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(1);

pub async fn push_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_push_socket(socket, state))
}

/// Subscriptions held by one socket, keyed by session id.
struct Joined {
	sink: mpsc::UnboundedSender<EventEnvelope>,
	handles: HashMap<String, SubscriptionHandle>,
}

impl Joined {
	fn handle_frame(&mut self, state: &AppState, text: &str) -> PushServerMessage {
		match serde_json::from_str::<PushClientMessage>(text) {
			Ok(PushClientMessage::Join { session_id }) => {
				if !self.handles.contains_key(&session_id) {
					let handle = state.manager.subscribe(&session_id, Arc::new(self.sink.clone()));
					self.handles.insert(session_id.clone(), handle);
				}
				let status = state.manager.current_status(&session_id);
				debug!(target: "wsm.push", session = %session_id, known = status.is_some(), "joined");
				PushServerMessage::Status { session_id, status }
			}
			Ok(PushClientMessage::Leave { session_id }) => {
				if let Some(handle) = self.handles.remove(&session_id) {
					state.manager.unsubscribe(&handle);
					debug!(target: "wsm.push", session = %session_id, "left");
				}
				let status = state.manager.current_status(&session_id);
				PushServerMessage::Status { session_id, status }
			}
			Err(err) => PushServerMessage::Error {
				message: format!("invalid message: {err}"),
			},
		}
	}

	fn release(self, state: &AppState) {
		for handle in self.handles.values() {
			state.manager.unsubscribe(handle);
		}
	}
}

async fn handle_push_socket(socket: WebSocket, state: AppState) {
	let socket_id = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
	info!(target: "wsm.push", socket = socket_id, "push client connected");

	let (events_tx, events_rx) = mpsc::unbounded_channel();
	let mut events = UnboundedReceiverStream::new(events_rx);
	let mut joined = Joined {
		sink: events_tx,
		handles: HashMap::new(),
	};
	let (mut ws_tx, mut ws_rx) = socket.split();

	loop {
		tokio::select! {
			_ = state.shutdown.cancelled() => {
				let _ = ws_tx.send(Message::Close(None)).await;
				break;
			}
			Some(envelope) = events.next() => {
				if send(&mut ws_tx, &PushServerMessage::Event { envelope }).await.is_err() {
					break;
				}
			}
			frame = ws_rx.next() => match frame {
				Some(Ok(Message::Text(text))) => {
					let reply = joined.handle_frame(&state, text.as_str());
					if send(&mut ws_tx, &reply).await.is_err() {
						break;
					}
				}
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(target: "wsm.push", socket = socket_id, error = %err, "push socket error");
					break;
				}
			},
		}
	}

	let sessions = joined.handles.len();
	joined.release(&state);
	info!(target: "wsm.push", socket = socket_id, sessions, "push client disconnected");
}

async fn send(ws_tx: &mut SplitSink<WebSocket, Message>, message: &PushServerMessage) -> Result<(), axum::Error> {
	match serde_json::to_string(message) {
		Ok(json) => ws_tx.send(Message::Text(json.into())).await,
		Err(err) => {
			warn!(target: "wsm.push", error = %err, "failed to encode push message");
			Ok(())
		}
	}
}
