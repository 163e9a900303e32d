//! Process-scoped owner of every session.
//!
//! [`SessionManager`] ties the registry, the broadcaster and the client
//! factory together and runs one supervisor task per session. The
//! supervisor initializes the handle, pumps client events into it and,
//! when the connection drops, asks the [`ReconnectPolicy`] what to do. A
//! pending retry is a cancellable sleep bound to the session's
//! `CancellationToken`, so delete stops it before tearing anything down.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};
use wsm_protocol::{DisconnectCause, SessionState, SessionSummary, StatusSnapshot};

use crate::broadcast::{EventBroadcaster, Subscriber, SubscriptionHandle};
use crate::client::{ClientEvent, ClientFactory};
use crate::error::{Error, Result};
use crate::handle::{HandleContext, SessionHandle};
use crate::hooks::Hooks;
use crate::reconnect::ReconnectPolicy;
use crate::registry::{Session, SessionRegistry};
use crate::storage::CredentialStore;

/// Settings for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
	/// Root holding one credential directory per session.
	pub sessions_dir: PathBuf,
	pub reconnect: ReconnectPolicy,
	/// Upper bound on one `initialize` (client open plus connect).
	pub initialize_timeout: Duration,
	/// Upper bound on one outgoing message.
	pub send_timeout: Duration,
}

impl ManagerConfig {
	pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
		Self {
			sessions_dir: sessions_dir.into(),
			reconnect: ReconnectPolicy::default(),
			initialize_timeout: Duration::from_secs(60),
			send_timeout: Duration::from_secs(30),
		}
	}

	pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
		self.reconnect = policy;
		self
	}

	pub fn with_initialize_timeout(mut self, timeout: Duration) -> Self {
		self.initialize_timeout = timeout;
		self
	}

	pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
		self.send_timeout = timeout;
		self
	}
}

/// What `create_session` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
	pub id: String,
	pub initial_state: SessionState,
}

pub struct SessionManager {
	registry: SessionRegistry,
	ctx: HandleContext,
	policy: ReconnectPolicy,
	initialize_timeout: Duration,
	this: Weak<SessionManager>,
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager")
			.field("sessions", &self.registry.len())
			.field("storage", &self.ctx.storage.root())
			.field("policy", &self.policy)
			.finish()
	}
}

impl SessionManager {
	pub fn new(config: ManagerConfig, factory: Arc<dyn ClientFactory>, hooks: Hooks) -> Arc<Self> {
		Arc::new_cyclic(|this| Self {
			registry: SessionRegistry::new(),
			ctx: HandleContext {
				storage: Arc::new(CredentialStore::new(config.sessions_dir)),
				factory,
				broadcaster: EventBroadcaster::new(),
				hooks,
				send_timeout: config.send_timeout,
			},
			policy: config.reconnect,
			initialize_timeout: config.initialize_timeout,
			this: this.clone(),
		})
	}

	pub fn broadcaster(&self) -> &EventBroadcaster {
		&self.ctx.broadcaster
	}

	pub fn storage(&self) -> &CredentialStore {
		&self.ctx.storage
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	/// Registers a session and starts connecting it in the background.
	///
	/// Returns as soon as the session is in the table; pairing progress is
	/// reported through the broadcaster. Must be called inside a Tokio
	/// runtime.
	pub fn create_session(&self, requested: Option<&str>) -> Result<CreatedSession> {
		let ctx = self.ctx.clone();
		let (session, predecessor) = self
			.registry
			.create(requested, |id| Session::new(SessionHandle::new(id, ctx)))?;

		let id = session.id().to_string();
		self.ctx.broadcaster.reset_status(&id, SessionState::Created);
		info!(target: "wsm.registry", session = %id, "session created");

		let task = tokio::spawn(supervise(
			self.this.clone(),
			Arc::clone(&session),
			predecessor,
			self.policy.clone(),
			self.initialize_timeout,
		));
		session.set_supervisor(task);

		Ok(CreatedSession {
			id,
			initial_state: SessionState::Created,
		})
	}

	pub fn list_sessions(&self) -> Vec<SessionSummary> {
		self.registry.list()
	}

	pub fn session_summary(&self, id: &str) -> Result<SessionSummary> {
		Ok(self.registry.get(id)?.summary())
	}

	/// Destroys the session: cancels any pending retry, closes the client
	/// and deletes its credentials.
	pub async fn delete_session(&self, id: &str) -> Result<()> {
		let session = self.registry.get(id)?;
		self.destroy(&session, None).await
	}

	pub async fn send_message(&self, id: &str, target_id: &str, text: &str) -> Result<()> {
		let session = self.registry.get(id)?;
		session.handle().send(target_id, text).await
	}

	/// Last known status, for subscribers that join late.
	pub fn current_status(&self, id: &str) -> Option<StatusSnapshot> {
		self.ctx.broadcaster.current_status(id)
	}

	pub fn subscribe(&self, id: &str, subscriber: Arc<dyn Subscriber>) -> SubscriptionHandle {
		self.ctx.broadcaster.subscribe(id, subscriber)
	}

	pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
		self.ctx.broadcaster.unsubscribe(handle);
	}

	/// Re-creates one session per credential directory left by a previous run.
	///
	/// Ids already registered are skipped. Returns the ids that were restored.
	pub fn restore_sessions(&self) -> Result<Vec<String>> {
		let mut restored = Vec::new();
		for id in self.ctx.storage.list_ids()? {
			match self.create_session(Some(&id)) {
				Ok(created) => restored.push(created.id),
				Err(Error::AlreadyExists { .. }) => {}
				Err(err) => warn!(target: "wsm.registry", session = %id, error = %err, "restoring session failed"),
			}
		}
		if !restored.is_empty() {
			info!(target: "wsm.registry", count = restored.len(), "restored sessions from storage");
		}
		Ok(restored)
	}

	/// Stops every session and clears the table.
	///
	/// Clients are disconnected but credentials stay on disk so
	/// [`restore_sessions`](Self::restore_sessions) can pick them up again.
	pub async fn shutdown(&self) {
		let sessions = self.registry.drain();
		for session in &sessions {
			session.cancel_token().cancel();
		}
		for session in &sessions {
			if let Some(task) = session.take_supervisor() {
				if let Err(err) = task.await {
					warn!(target: "wsm.registry", session = %session.id(), error = %err, "supervisor task failed");
				}
			}
			session.handle().release().await;
			session.mark_released();
		}
		info!(target: "wsm.registry", count = sessions.len(), "session manager shut down");
	}

	/// Moves the session to `Destroyed` and releases everything it owns.
	///
	/// The registry entry is removed even when deleting the credential
	/// directory fails; that error is still returned.
	async fn destroy(&self, session: &Arc<Session>, cause: Option<DisconnectCause>) -> Result<()> {
		if !session.handle().mark_destroyed(cause) {
			return Err(Error::not_found(session.id()));
		}
		session.cancel_token().cancel();

		let result = session.handle().teardown().await;
		self.registry.remove_session(session);
		self.ctx.broadcaster.clear_destroyed_status(session.id());
		session.mark_released();

		match &result {
			Ok(()) => info!(target: "wsm.registry", session = %session.id(), cause = ?cause, "session destroyed"),
			Err(err) => warn!(target: "wsm.registry", session = %session.id(), error = %err, "session destroyed with storage error"),
		}
		result
	}
}

async fn supervise(
	manager: Weak<SessionManager>,
	session: Arc<Session>,
	predecessor: Option<Arc<Session>>,
	policy: ReconnectPolicy,
	initialize_timeout: Duration,
) {
	let cancel = session.cancel_token().clone();

	if let Some(previous) = predecessor {
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = previous.wait_released() => {}
		}
	}

	let mut attempt = 0u32;
	loop {
		let cause = tokio::select! {
			_ = cancel.cancelled() => return,
			cause = run_connection(session.handle(), initialize_timeout, &mut attempt) => cause,
		};
		if cancel.is_cancelled() || session.state().is_destroyed() {
			return;
		}

		let decision = policy.decide(cause, attempt);
		if !decision.retry {
			info!(target: "wsm.reconnect", session = %session.id(), cause = %cause, attempt, "not retrying, destroying session");
			if let Some(manager) = manager.upgrade() {
				if let Err(err) = manager.destroy(&session, Some(cause)).await {
					debug!(target: "wsm.reconnect", session = %session.id(), error = %err, "destroy after terminal disconnect");
				}
			}
			return;
		}

		attempt = attempt.saturating_add(1);
		info!(
			target: "wsm.reconnect",
			session = %session.id(),
			cause = %cause,
			attempt,
			delay_ms = decision.delay.as_millis() as u64,
			"scheduling reconnect"
		);
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = tokio::time::sleep(decision.delay) => {}
		}
	}
}

/// Initializes the handle and feeds it client events until the connection
/// ends. Returns why it ended. Resets `attempt` once the session connects.
async fn run_connection(handle: &Arc<SessionHandle>, initialize_timeout: Duration, attempt: &mut u32) -> DisconnectCause {
	let mut events = match tokio::time::timeout(initialize_timeout, handle.initialize()).await {
		Ok(Ok(events)) => events,
		Ok(Err(Error::InitializationFailed { source, .. })) => {
			warn!(target: "wsm.session", session = %handle.id(), error = %source, "initialization failed");
			return source.disconnect_cause();
		}
		Ok(Err(err)) => {
			warn!(target: "wsm.session", session = %handle.id(), error = %err, "initialization failed");
			return DisconnectCause::Unknown;
		}
		Err(_) => {
			warn!(
				target: "wsm.session",
				session = %handle.id(),
				timeout_ms = initialize_timeout.as_millis() as u64,
				"initialization timed out"
			);
			handle.drop_connection(DisconnectCause::NetworkError).await;
			return DisconnectCause::NetworkError;
		}
	};

	while let Some(event) = events.recv().await {
		let ready = matches!(event, ClientEvent::Ready(_));
		if let Some(cause) = handle.handle_event(event).await {
			return cause;
		}
		if ready && handle.state() == SessionState::Connected {
			*attempt = 0;
		}
	}

	debug!(target: "wsm.session", session = %handle.id(), "client event stream closed");
	handle.drop_connection(DisconnectCause::Unknown).await;
	DisconnectCause::Unknown
}
