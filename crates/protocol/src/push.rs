//! Messages exchanged on the WebSocket push channel.
//!
//! The channel is deliberately small:
//!
//! 1. Client connects and sends [`PushClientMessage::Join`] for each session it wants to watch
//! 2. Server answers with [`PushServerMessage::Status`] (last known status, possibly `None`)
//! 3. Server streams [`PushServerMessage::Event`] for every event of the joined sessions
//! 4. Client may send [`PushClientMessage::Leave`] to stop receiving a session's events
//!
//! Malformed client frames get a [`PushServerMessage::Error`]; the connection stays open.

use serde::{Deserialize, Serialize};

use crate::event::EventEnvelope;
use crate::session::StatusSnapshot;

/// Message sent from a browser/management client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PushClientMessage {
	/// Subscribe to every event of one session.
	Join { session_id: String },
	/// Drop a previous subscription. Leaving a session that was never joined is a no-op.
	Leave { session_id: String },
}

/// Message sent from the server to a push client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PushServerMessage {
	/// Reply to a join: the session's last known status.
	Status {
		session_id: String,
		/// `None` when the broadcaster has never seen the session.
		status: Option<StatusSnapshot>,
	},
	/// A relayed session event.
	Event { envelope: EventEnvelope },
	/// The previous client frame could not be handled.
	Error { message: String },
}
