//! Gateway webhook intake.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use wsm_runtime::DispatchOutcome;

use super::AppState;

/// Hands one webhook to the router. Always answers 200; payloads that
/// cannot be delivered are only logged.
pub async fn receive(State(state): State<AppState>, Path(instance): Path<String>, body: Bytes) -> StatusCode {
	let Some(router) = state.webhooks.as_ref() else {
		return StatusCode::OK;
	};
	let payload: Value = match serde_json::from_slice(&body) {
		Ok(payload) => payload,
		Err(err) => {
			warn!(target: "wsm.webhook", instance = %instance, error = %err, "ignoring malformed webhook");
			return StatusCode::OK;
		}
	};

	if let DispatchOutcome::Delivered(count) = router.dispatch(&instance, &payload) {
		debug!(target: "wsm.webhook", instance = %instance, events = count, "webhook delivered");
	}
	StatusCode::OK
}
