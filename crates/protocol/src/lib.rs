//! Wire types shared by the session core, the gateway adapters and the
//! management/push surfaces.
//!
//! Nothing in here carries behavior beyond (de)serialization and a few
//! classification helpers, so every layer can depend on it without pulling
//! in a runtime.

pub mod api;
pub mod event;
pub mod push;
pub mod session;

pub use api::{
	ApiError, ApiResponse, CreateSessionRequest, CreateSessionResponse, ErrorCode, SendMessageRequest,
};
pub use event::{EventEnvelope, MessageContent, SessionEvent};
pub use push::{PushClientMessage, PushServerMessage};
pub use session::{AccountIdentity, DisconnectCause, SessionState, SessionSummary, StatusSnapshot};

/// Milliseconds since the unix epoch, saturating to zero on a skewed clock.
pub fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}
