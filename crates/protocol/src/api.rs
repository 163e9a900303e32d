//! Request and response bodies of the management API.
//!
//! Every response uses the same envelope: `{"ok": true, "data": ...}` on
//! success and `{"ok": false, "error": {"code": ..., "message": ...}}` on
//! failure, so callers never have to parse free-form error text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Stable error codes reported by the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// A live session with the requested id already exists
	AlreadyExists,
	/// No session with that id
	NotFound,
	/// The session is not paired/online yet
	NotConnected,
	/// The client reported a transport failure while sending
	SendFailed,
	/// The client could not be opened
	InitializationFailed,
	/// Malformed request or session id
	InvalidInput,
	/// Operation exceeded its time budget
	Timeout,
	/// Unknown/internal error
	InternalError,
}

impl ErrorCode {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCode::AlreadyExists => "ALREADY_EXISTS",
			ErrorCode::NotFound => "NOT_FOUND",
			ErrorCode::NotConnected => "NOT_CONNECTED",
			ErrorCode::SendFailed => "SEND_FAILED",
			ErrorCode::InitializationFailed => "INITIALIZATION_FAILED",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error information for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
	pub code: ErrorCode,
	pub message: String,
}

/// Response envelope shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
	pub fn success(data: T) -> Self {
		Self {
			ok: true,
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			ok: false,
			data: None,
			error: Some(ApiError {
				code,
				message: message.into(),
			}),
		}
	}
}

impl ApiResponse<()> {
	/// Success without a payload, serialized as `{"ok": true}`.
	pub fn done() -> Self {
		Self {
			ok: true,
			data: None,
			error: None,
		}
	}
}

/// `POST /api/create-session`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
	/// Caller-chosen id; generated when absent or blank.
	#[serde(default, alias = "sessionId")]
	pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
	pub id: String,
	pub initial_state: SessionState,
}

/// `POST /api/send-message`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
	#[serde(alias = "sessionId")]
	pub id: String,
	pub target_id: String,
	pub text: String,
}
