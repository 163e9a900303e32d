//! Normalized session events.
//!
//! Whatever client library sits underneath, the relay only ever speaks these
//! three events. Each is wrapped in an [`EventEnvelope`] that names the
//! originating session.

use serde::{Deserialize, Serialize};

use crate::session::{AccountIdentity, DisconnectCause, SessionState};

/// Event emitted by a session handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionEvent {
	/// A pairing token is ready to be displayed (usually as a QR code).
	///
	/// May fire several times before the session connects, each payload
	/// replacing the previous one.
	PairingChallenge { payload: String },
	/// Connection state transition.
	StateChanged {
		from: SessionState,
		to: SessionState,
		/// Set on transitions into `disconnected` and `destroyed`.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		cause: Option<DisconnectCause>,
		/// Set on transitions into `connected`.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		identity: Option<AccountIdentity>,
	},
	/// A message arrived on the session.
	InboundMessage {
		sender_id: String,
		sender_display_name: String,
		content: MessageContent,
		/// Unix epoch milliseconds reported by the sender side.
		timestamp_ms: u64,
	},
}

impl SessionEvent {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::PairingChallenge { .. } => "pairing_challenge",
			Self::StateChanged { .. } => "state_changed",
			Self::InboundMessage { .. } => "inbound_message",
		}
	}
}

/// Body of an inbound message, reduced to a small closed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MessageContent {
	Text { text: String },
	/// Media is not relayed; only its type and caption are.
	MediaPlaceholder {
		media_type: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		caption: Option<String>,
	},
	/// Any message shape the client did not recognize, tagged with the raw type.
	Unknown { type_tag: String },
}

impl MessageContent {
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text { text } => Some(text),
			_ => None,
		}
	}
}

/// A [`SessionEvent`] tagged with the session it originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	pub session_id: String,
	/// Unix epoch milliseconds when the event was published.
	pub timestamp_ms: u64,
	#[serde(flatten)]
	pub event: SessionEvent,
}

impl EventEnvelope {
	pub fn new(session_id: impl Into<String>, event: SessionEvent) -> Self {
		Self {
			session_id: session_id.into(),
			timestamp_ms: crate::now_ms(),
			event,
		}
	}
}
