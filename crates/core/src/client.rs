//! Capability boundary to the underlying WhatsApp client library.
//!
//! The core never talks to WhatsApp itself. A [`ClientFactory`] opens one
//! [`WhatsAppClient`] per session, pointed at that session's credential
//! directory, and the client reports everything that happens on its
//! connection as [`ClientEvent`]s pushed into an [`EventSink`]. Swapping the
//! library (or using [`crate::testing`] in tests) means implementing these
//! two traits, nothing else.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use wsm_protocol::{AccountIdentity, DisconnectCause};

/// Channel a client pushes its raw events into.
pub type EventSink = mpsc::UnboundedSender<ClientEvent>;

/// Receiving end handed back by [`crate::SessionHandle::initialize`].
pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

/// Library-level event, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
	/// Pairing token to show the user.
	Qr(String),
	/// Pairing accepted; the client is finishing its handshake.
	Authenticated,
	/// Online as the given account.
	Ready(AccountIdentity),
	Message(RawMessage),
	/// Credentials on disk were rewritten by the library.
	CredentialsUpdated,
	Disconnected(DisconnectCause),
}

/// Inbound message as the library reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
	/// Sender address (e.g. `15551234567@s.whatsapp.net`).
	pub sender_id: String,
	/// Push name of the sender when the library knows it.
	pub sender_name: Option<String>,
	/// Library-specific message type (`conversation`, `imageMessage`, `chat`, ...).
	pub kind: String,
	/// Text body, for text messages.
	pub text: Option<String>,
	/// Caption, for media messages.
	pub caption: Option<String>,
	/// Unix epoch milliseconds.
	pub timestamp_ms: u64,
}

impl RawMessage {
	/// Shorthand for a plain text message.
	pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			sender_id: sender_id.into(),
			sender_name: None,
			kind: "conversation".to_string(),
			text: Some(text.into()),
			caption: None,
			timestamp_ms: wsm_protocol::now_ms(),
		}
	}
}

/// Failure reported by a client implementation.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
	/// Network or gateway failure; worth retrying.
	#[error("transport error: {0}")]
	Transport(String),

	/// Stored credentials were rejected.
	#[error("authentication failed: {0}")]
	Auth(String),

	/// The client was already closed.
	#[error("client is closed")]
	Closed,

	/// The remote side refused the request.
	#[error("request rejected: {0}")]
	Rejected(String),
}

impl ClientError {
	/// Disconnect cause to feed the reconnect policy when opening the client fails.
	pub fn disconnect_cause(&self) -> DisconnectCause {
		match self {
			ClientError::Auth(_) => DisconnectCause::LoggedOut,
			ClientError::Transport(_) | ClientError::Closed | ClientError::Rejected(_) => DisconnectCause::NetworkError,
		}
	}
}

/// One connection to WhatsApp, owned by exactly one session handle.
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
	/// Opens the connection and starts pushing events into `events`.
	///
	/// Returning `Ok` does not mean the session is paired; pairing progress
	/// arrives as [`ClientEvent::Qr`] / [`ClientEvent::Ready`].
	async fn connect(&self, events: EventSink) -> Result<(), ClientError>;

	/// Closes the connection. Must tolerate being called on a closed client.
	async fn disconnect(&self) -> Result<(), ClientError>;

	async fn send_text(&self, target_id: &str, text: &str) -> Result<(), ClientError>;

	/// Drops credential state the client keeps outside the session's
	/// storage directory (e.g. on a remote gateway).
	async fn forget(&self) -> Result<(), ClientError> {
		Ok(())
	}
}

/// Opens clients for sessions.
pub trait ClientFactory: Send + Sync {
	/// Builds a client for `session_id` that persists and reloads its
	/// credentials under `storage`. Must not perform network I/O.
	fn create(&self, session_id: &str, storage: &Path) -> Result<Arc<dyn WhatsAppClient>, ClientError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn auth_failure_is_terminal() {
		assert_eq!(ClientError::Auth("bad creds".into()).disconnect_cause(), DisconnectCause::LoggedOut);
		assert!(ClientError::Auth("bad creds".into()).disconnect_cause().is_terminal());
	}

	#[test]
	fn transport_failure_is_retryable() {
		let cause = ClientError::Transport("connection refused".into()).disconnect_cause();
		assert_eq!(cause, DisconnectCause::NetworkError);
		assert!(!cause.is_terminal());
	}
}
