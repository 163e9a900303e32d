//! Error types for the gateway adapters.

use thiserror::Error;
use wsm::{ClientError, MirrorError};

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to the WhatsApp gateway or GitHub.
#[derive(Debug, Error)]
pub enum Error {
	/// The request never got a response.
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	/// The remote answered with a non-success status.
	#[error("{service} returned {status}: {body}")]
	Status {
		service: &'static str,
		status: u16,
		body: String,
	},

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A required token is not available in the environment.
	#[error("Environment variable {0} is not set")]
	MissingToken(String),
}

impl Error {
	pub(crate) fn status(service: &'static str, status: reqwest::StatusCode, body: String) -> Self {
		Error::Status {
			service,
			status: status.as_u16(),
			body: truncate(body, 500),
		}
	}

	/// HTTP status of a rejected request, if any.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			Error::Status { status, .. } => Some(*status),
			Error::Http(err) => err.status().map(|s| s.as_u16()),
			_ => None,
		}
	}

	/// True if the gateway refused the API key or the session's credentials.
	pub fn is_auth(&self) -> bool {
		matches!(self.http_status(), Some(401))
	}
}

impl From<Error> for ClientError {
	fn from(err: Error) -> Self {
		match &err {
			e if e.is_auth() => ClientError::Auth(err.to_string()),
			Error::Status { status, .. } if (400..500).contains(status) => ClientError::Rejected(err.to_string()),
			_ => ClientError::Transport(err.to_string()),
		}
	}
}

impl From<Error> for MirrorError {
	fn from(err: Error) -> Self {
		match err {
			Error::Io(io) => MirrorError::Io(io),
			Error::MissingToken(var) => MirrorError::NotConfigured(format!("{var} is not set")),
			other => MirrorError::Upload(other.to_string()),
		}
	}
}

fn truncate(mut body: String, max: usize) -> String {
	if body.len() > max {
		let mut end = max;
		while !body.is_char_boundary(end) {
			end -= 1;
		}
		body.truncate(end);
		body.push_str("...");
	}
	body
}

#[cfg(test)]
mod tests {
	use super::*;

	fn status(code: u16) -> Error {
		Error::Status {
			service: "gateway",
			status: code,
			body: String::new(),
		}
	}

	#[test]
	fn unauthorized_maps_to_auth() {
		assert!(matches!(ClientError::from(status(401)), ClientError::Auth(_)));
	}

	#[test]
	fn client_errors_are_rejections_and_server_errors_transport() {
		assert!(matches!(ClientError::from(status(400)), ClientError::Rejected(_)));
		assert!(matches!(ClientError::from(status(502)), ClientError::Transport(_)));
	}

	#[test]
	fn long_bodies_are_truncated_on_char_boundary() {
		let body = "é".repeat(400);
		let out = truncate(body, 501);
		assert!(out.ends_with("..."));
		assert!(out.len() <= 504);
	}
}
