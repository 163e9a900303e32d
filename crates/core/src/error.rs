//! Error types for the session core.

use std::path::PathBuf;

use thiserror::Error;
use wsm_protocol::{ErrorCode, SessionState};

use crate::client::ClientError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the registry, handles and the session manager.
#[derive(Debug, Error)]
pub enum Error {
	/// A live session with this id is already registered.
	#[error("session already exists: {id}")]
	AlreadyExists { id: String },

	/// No live session with this id.
	#[error("session not found: {id}")]
	NotFound { id: String },

	/// Send attempted before pairing completed (or after the connection dropped).
	#[error("session {id} is not connected (state: {state})")]
	NotConnected { id: String, state: SessionState },

	/// The client reported a failure while sending.
	#[error("sending on session {id} failed: {reason}")]
	SendFailed { id: String, reason: String },

	/// Opening the client failed.
	#[error("initializing session {id} failed: {source}")]
	InitializationFailed {
		id: String,
		#[source]
		source: ClientError,
	},

	/// Caller-supplied id cannot be used as a session id.
	#[error("invalid session id {id:?}: {reason}")]
	InvalidSessionId { id: String, reason: &'static str },

	/// The session was destroyed while the operation was in flight.
	#[error("session {id} was destroyed")]
	Destroyed { id: String },

	/// Credential directory could not be created or removed.
	#[error("credential storage error at {}: {source}", path.display())]
	Storage {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// Timeout waiting for an operation on the client.
	#[error("timeout after {ms}ms waiting for: {operation}")]
	Timeout { ms: u64, operation: String },
}

impl Error {
	/// Maps the error onto the stable code reported by the management API.
	pub fn code(&self) -> ErrorCode {
		match self {
			Error::AlreadyExists { .. } => ErrorCode::AlreadyExists,
			Error::NotFound { .. } | Error::Destroyed { .. } => ErrorCode::NotFound,
			Error::NotConnected { .. } => ErrorCode::NotConnected,
			Error::SendFailed { .. } => ErrorCode::SendFailed,
			Error::InitializationFailed { .. } => ErrorCode::InitializationFailed,
			Error::InvalidSessionId { .. } => ErrorCode::InvalidInput,
			Error::Timeout { .. } => ErrorCode::Timeout,
			Error::Storage { .. } => ErrorCode::InternalError,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	pub(crate) fn not_found(id: &str) -> Self {
		Error::NotFound { id: id.to_string() }
	}
}
