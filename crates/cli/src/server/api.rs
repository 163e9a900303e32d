//! Management API handlers.
//!
//! Every handler answers with the [`ApiResponse`] envelope; failures carry a
//! stable [`ErrorCode`] and an HTTP status derived from it.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use wsm::protocol::{
	ApiResponse, CreateSessionRequest, CreateSessionResponse, ErrorCode, SendMessageRequest, SessionSummary,
};

use super::AppState;

/// A failed request, rendered as `{"ok": false, "error": {...}}`.
#[derive(Debug)]
pub struct Failure {
	code: ErrorCode,
	message: String,
}

impl Failure {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	pub fn invalid_input(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InvalidInput, message)
	}
}

impl From<wsm::Error> for Failure {
	fn from(err: wsm::Error) -> Self {
		Self::new(err.code(), err.to_string())
	}
}

impl IntoResponse for Failure {
	fn into_response(self) -> Response {
		let status = status_for(self.code);
		debug!(target: "wsm.http", code = %self.code, status = status.as_u16(), message = %self.message, "request failed");
		(status, Json(ApiResponse::<()>::failure(self.code, self.message))).into_response()
	}
}

pub fn status_for(code: ErrorCode) -> StatusCode {
	match code {
		ErrorCode::AlreadyExists | ErrorCode::NotConnected => StatusCode::CONFLICT,
		ErrorCode::NotFound => StatusCode::NOT_FOUND,
		ErrorCode::SendFailed | ErrorCode::InitializationFailed => StatusCode::BAD_GATEWAY,
		ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
		ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
		ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, Failure>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
	Ok(Json(ApiResponse::success(data)))
}

/// Parses a JSON body; an empty body means `T::default()`.
fn parse_optional<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Failure> {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(T::default());
	}
	parse(body)
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, Failure> {
	serde_json::from_slice(body).map_err(|err| Failure::invalid_input(format!("invalid request body: {err}")))
}

pub async fn health() -> &'static str {
	"OK"
}

pub async fn create_session(State(state): State<AppState>, body: Bytes) -> ApiResult<CreateSessionResponse> {
	let request: CreateSessionRequest = parse_optional(&body)?;
	let created = state.manager.create_session(request.id.as_deref())?;
	info!(target: "wsm.http", session = %created.id, "session created");
	ok(CreateSessionResponse {
		id: created.id,
		initial_state: created.initial_state,
	})
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Vec<SessionSummary>> {
	ok(state.manager.list_sessions())
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<SessionSummary> {
	ok(state.manager.session_summary(&id)?)
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ApiResponse<()>>, Failure> {
	state.manager.delete_session(&id).await?;
	info!(target: "wsm.http", session = %id, "session deleted");
	Ok(Json(ApiResponse::done()))
}

pub async fn send_message(State(state): State<AppState>, body: Bytes) -> Result<Json<ApiResponse<()>>, Failure> {
	let request: SendMessageRequest = parse(&body)?;
	if request.target_id.trim().is_empty() {
		return Err(Failure::invalid_input("targetId is required"));
	}
	state
		.manager
		.send_message(&request.id, &request.target_id, &request.text)
		.await?;
	debug!(target: "wsm.http", session = %request.id, recipient = %request.target_id, "message sent");
	Ok(Json(ApiResponse::done()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_mapping() {
		assert_eq!(status_for(ErrorCode::AlreadyExists), StatusCode::CONFLICT);
		assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
		assert_eq!(status_for(ErrorCode::NotConnected), StatusCode::CONFLICT);
		assert_eq!(status_for(ErrorCode::SendFailed), StatusCode::BAD_GATEWAY);
		assert_eq!(status_for(ErrorCode::InvalidInput), StatusCode::BAD_REQUEST);
		assert_eq!(status_for(ErrorCode::Timeout), StatusCode::GATEWAY_TIMEOUT);
	}

	#[test]
	fn blank_body_is_default_request() {
		let request: CreateSessionRequest = parse_optional(&Bytes::from_static(b"  \n")).unwrap();
		assert!(request.id.is_none());

		let err = parse_optional::<CreateSessionRequest>(&Bytes::from_static(b"{nope")).unwrap_err();
		assert_eq!(err.code, ErrorCode::InvalidInput);
	}
}
