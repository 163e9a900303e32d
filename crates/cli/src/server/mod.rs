//! HTTP surface: management API, WebSocket push channel and webhook intake.

pub mod api;
pub mod push;
pub mod webhook;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use wsm::SessionManager;
use wsm_runtime::WebhookRouter;

use crate::app;
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
	pub manager: Arc<SessionManager>,
	pub webhooks: Option<WebhookRouter>,
	/// Cancelled when the server stops; open push sockets close on it.
	pub shutdown: CancellationToken,
}

impl AppState {
	pub fn new(manager: Arc<SessionManager>, webhooks: Option<WebhookRouter>) -> Self {
		Self {
			manager,
			webhooks,
			shutdown: CancellationToken::new(),
		}
	}
}

pub fn router(state: AppState) -> Router {
	let mut app = Router::new()
		.route("/api/health", get(api::health))
		.route("/api/create-session", post(api::create_session))
		.route("/api/sessions", get(api::list_sessions))
		.route("/api/session/{id}", get(api::get_session).delete(api::delete_session))
		.route("/api/send-message", post(api::send_message))
		.route("/ws", get(push::push_socket));
	if state.webhooks.is_some() {
		app = app.route("/webhook/{instance}", post(webhook::receive));
	}
	app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serves until `shutdown` resolves, then stops accepting and closes push sockets.
pub async fn serve(
	listener: TcpListener,
	state: AppState,
	shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
	let token = state.shutdown.clone();
	let signal_token = token.clone();
	let result = axum::serve(listener, router(state))
		.with_graceful_shutdown(async move {
			tokio::select! {
				_ = shutdown => {}
				_ = signal_token.cancelled() => {}
			}
			signal_token.cancel();
		})
		.await
		.context("HTTP server error");
	token.cancel();
	result
}

/// Runs `wsm serve` until Ctrl-C or SIGTERM.
pub async fn run(config: AppConfig) -> Result<()> {
	let app = app::build(&config)?;

	if config.restore_on_start {
		match app.manager.restore_sessions() {
			Ok(ids) if ids.is_empty() => {}
			Ok(ids) => info!(target: "wsm.session", count = ids.len(), "restored sessions from credentials"),
			Err(err) => warn!(target: "wsm.session", error = %err, "restoring sessions failed"),
		}
	}

	let host = config.server.host.as_str();
	let port = config.server.port;
	let listener = TcpListener::bind((host, port)).await.map_err(|source| CliError::Bind {
		addr: format!("{host}:{port}"),
		source,
	})?;
	info!(
		target: "wsm.http",
		addr = %listener.local_addr()?,
		sessions_dir = %config.sessions_dir.display(),
		"listening"
	);

	let state = AppState::new(Arc::clone(&app.manager), app.webhooks);
	let served = serve(listener, state, shutdown_signal()).await;

	info!(target: "wsm.http", "stopping sessions");
	app.manager.shutdown().await;
	served.map_err(CliError::from)
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			warn!(target: "wsm.http", error = %err, "failed to install Ctrl-C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{SignalKind, signal};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(err) => {
				warn!(target: "wsm.http", error = %err, "failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => info!(target: "wsm.http", "received Ctrl-C, shutting down"),
		_ = terminate => info!(target: "wsm.http", "received SIGTERM, shutting down"),
	}
}
