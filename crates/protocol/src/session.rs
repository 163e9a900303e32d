//! Session state, disconnect causes and summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// Allocated in the registry, client not opened yet.
	Created,
	/// A pairing challenge is being shown and waits to be scanned.
	AwaitingPairing,
	/// Client is opening or resuming its connection.
	Connecting,
	/// Paired and online.
	Connected,
	/// Connection dropped; a retry may be pending.
	Disconnected,
	/// Terminal. The id needs a fresh create to be used again.
	Destroyed,
}

impl SessionState {
	/// States in which the session must own a live client.
	pub fn is_live(self) -> bool {
		matches!(self, Self::AwaitingPairing | Self::Connecting | Self::Connected)
	}

	pub fn is_destroyed(self) -> bool {
		self == Self::Destroyed
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Created => "created",
			Self::AwaitingPairing => "awaiting_pairing",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
			Self::Disconnected => "disconnected",
			Self::Destroyed => "destroyed",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCause {
	NetworkError,
	ServerRestart,
	/// The account logged this device out; credentials are void.
	LoggedOut,
	/// Another client took over the session.
	Replaced,
	Unknown,
}

impl DisconnectCause {
	/// Causes after which re-initializing would fail authentication.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::LoggedOut | Self::Replaced)
	}
}

impl fmt::Display for DisconnectCause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::NetworkError => "network_error",
			Self::ServerRestart => "server_restart",
			Self::LoggedOut => "logged_out",
			Self::Replaced => "replaced",
			Self::Unknown => "unknown",
		};
		f.write_str(s)
	}
}

/// Account a session is paired with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
	/// Account address as reported by the client (e.g. `15551234567@s.whatsapp.net`).
	pub id: String,
	/// Push name; clients fall back to `"User"` when the account has none.
	pub name: String,
}

/// Point-in-time description of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
	pub id: String,
	pub state: SessionState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connected_identity: Option<AccountIdentity>,
	/// Unix epoch milliseconds when the session was created.
	pub created_at_ms: u64,
}

/// Last known status of a session as seen by the event broadcaster.
///
/// Served to subscribers that join after the interesting events already
/// happened; it is not a replay of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
	pub session_id: String,
	pub state: SessionState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connected_identity: Option<AccountIdentity>,
	/// Most recent pairing payload while the session awaits pairing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pending_pairing: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_cause: Option<DisconnectCause>,
	pub updated_at_ms: u64,
}

impl StatusSnapshot {
	pub fn new(session_id: impl Into<String>, state: SessionState) -> Self {
		Self {
			session_id: session_id.into(),
			state,
			connected_identity: None,
			pending_pairing: None,
			last_cause: None,
			updated_at_ms: crate::now_ms(),
		}
	}
}
