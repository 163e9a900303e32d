//! One session's adapter around its [`WhatsAppClient`].
//!
//! A [`SessionHandle`] owns the client, tracks the session state and turns
//! raw [`ClientEvent`]s into [`SessionEvent`]s on the broadcaster. It does
//! not decide about retries; the manager's supervisor task drives
//! [`SessionHandle::initialize`] and reads the event stream it returns.
//!
//! State lives behind a `parking_lot` mutex that is never held across an
//! await or while publishing. The client slot is a `tokio` mutex so that
//! initialize and teardown serialize on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};
use wsm_protocol::{AccountIdentity, DisconnectCause, SessionEvent, SessionState};

use crate::broadcast::EventBroadcaster;
use crate::client::{ClientEvent, ClientFactory, EventStream, WhatsAppClient};
use crate::error::{Error, Result};
use crate::hooks::Hooks;
use crate::message;
use crate::storage::CredentialStore;

/// Everything a handle needs from the process around it.
#[derive(Clone)]
pub struct HandleContext {
	pub storage: Arc<CredentialStore>,
	pub factory: Arc<dyn ClientFactory>,
	pub broadcaster: EventBroadcaster,
	pub hooks: Hooks,
	pub send_timeout: Duration,
}

#[derive(Debug)]
struct Status {
	state: SessionState,
	last_qr: Option<String>,
	identity: Option<AccountIdentity>,
	/// A pairing challenge was shown since the last `Ready`.
	paired_since_ready: bool,
}

type ClientSlot = Option<Arc<dyn WhatsAppClient>>;

pub struct SessionHandle {
	id: String,
	ctx: HandleContext,
	status: Mutex<Status>,
	client: AsyncMutex<ClientSlot>,
}

impl std::fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionHandle")
			.field("id", &self.id)
			.field("status", &*self.status.lock())
			.finish_non_exhaustive()
	}
}

impl SessionHandle {
	pub fn new(id: impl Into<String>, ctx: HandleContext) -> Self {
		Self {
			id: id.into(),
			ctx,
			status: Mutex::new(Status {
				state: SessionState::Created,
				last_qr: None,
				identity: None,
				paired_since_ready: false,
			}),
			client: AsyncMutex::new(None),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn state(&self) -> SessionState {
		self.status.lock().state
	}

	pub fn connected_identity(&self) -> Option<AccountIdentity> {
		self.status.lock().identity.clone()
	}

	/// Most recent pairing payload, present only while awaiting pairing.
	pub fn last_qr(&self) -> Option<String> {
		self.status.lock().last_qr.clone()
	}

	pub fn storage_path(&self) -> PathBuf {
		self.ctx.storage.path_for(&self.id)
	}

	/// Opens a fresh client on this session's credential directory.
	///
	/// Any client left over from a previous connection is disconnected
	/// first, so this is safe to call again after a disconnect. Returns the
	/// stream of raw client events; the caller feeds them back through
	/// [`handle_event`](Self::handle_event).
	pub async fn initialize(&self) -> Result<EventStream> {
		let mut slot = self.client.lock().await;
		if self.state().is_destroyed() {
			return Err(self.destroyed());
		}

		if let Some(stale) = slot.take() {
			if let Err(err) = stale.disconnect().await {
				debug!(target: "wsm.session", session = %self.id, error = %err, "stale client disconnect failed");
			}
		}

		let path = self.ctx.storage.ensure(&self.id)?;
		let client = match self.ctx.factory.create(&self.id, &path) {
			Ok(client) => client,
			Err(source) => {
				self.transition(SessionState::Disconnected, Some(source.disconnect_cause()), None);
				return Err(Error::InitializationFailed {
					id: self.id.clone(),
					source,
				});
			}
		};
		*slot = Some(Arc::clone(&client));

		if !self.transition(SessionState::Connecting, None, None) {
			return Err(self.destroyed());
		}

		let (sink, events) = mpsc::unbounded_channel();
		debug!(target: "wsm.session", session = %self.id, path = %path.display(), "connecting client");
		match client.connect(sink).await {
			Ok(()) => Ok(events),
			Err(source) => {
				warn!(target: "wsm.session", session = %self.id, error = %source, "client connect failed");
				self.transition(SessionState::Disconnected, Some(source.disconnect_cause()), None);
				Err(Error::InitializationFailed {
					id: self.id.clone(),
					source,
				})
			}
		}
	}

	/// Applies one raw client event.
	///
	/// Returns the cause when the event ended the connection; the handle
	/// is then `Disconnected` and the caller decides about a retry.
	pub async fn handle_event(self: &Arc<Self>, event: ClientEvent) -> Option<DisconnectCause> {
		if self.state().is_destroyed() {
			return None;
		}

		match event {
			ClientEvent::Qr(payload) => {
				{
					let mut status = self.status.lock();
					status.last_qr = Some(payload.clone());
					status.paired_since_ready = true;
				}
				self.transition(SessionState::AwaitingPairing, None, None);
				debug!(target: "wsm.session", session = %self.id, "pairing challenge issued");
				self.ctx
					.broadcaster
					.publish(&self.id, SessionEvent::PairingChallenge { payload });
				None
			}
			ClientEvent::Authenticated => {
				self.transition(SessionState::Connecting, None, None);
				None
			}
			ClientEvent::Ready(identity) => {
				let fresh_pairing = {
					let mut status = self.status.lock();
					std::mem::take(&mut status.paired_since_ready)
				};
				if self.transition(SessionState::Connected, None, Some(identity.clone())) {
					info!(target: "wsm.session", session = %self.id, account = %identity.id, "session connected");
					if fresh_pairing {
						self.spawn_connected_notice(identity);
						self.spawn_mirror();
					}
				}
				None
			}
			ClientEvent::Message(raw) => {
				let event = message::inbound_event(&raw);
				let text = match &event {
					SessionEvent::InboundMessage { content, .. } => content.as_text().map(str::to_string),
					_ => None,
				};
				self.ctx.broadcaster.publish(&self.id, event);
				if let Some(text) = text {
					self.spawn_auto_reply(raw.sender_id, text);
				}
				None
			}
			ClientEvent::CredentialsUpdated => {
				debug!(target: "wsm.session", session = %self.id, "credentials updated");
				None
			}
			ClientEvent::Disconnected(cause) => {
				self.drop_connection(cause).await;
				Some(cause)
			}
		}
	}

	/// Marks the connection as lost and closes the client.
	///
	/// The client stays in its slot so a later teardown can still forget it.
	pub async fn drop_connection(&self, cause: DisconnectCause) {
		let client = self.client.lock().await.clone();
		if let Some(client) = client {
			if let Err(err) = client.disconnect().await {
				debug!(target: "wsm.session", session = %self.id, error = %err, "disconnect after drop failed");
			}
		}
		if self.transition(SessionState::Disconnected, Some(cause), None) {
			info!(target: "wsm.session", session = %self.id, cause = %cause, "session disconnected");
		}
	}

	/// Sends a text message. Fails with `NotConnected` without touching the
	/// client unless the session is connected.
	pub async fn send(&self, target_id: &str, text: &str) -> Result<()> {
		let state = self.state();
		if state != SessionState::Connected {
			return Err(Error::NotConnected {
				id: self.id.clone(),
				state,
			});
		}
		let client = self.client.lock().await.clone().ok_or_else(|| Error::NotConnected {
			id: self.id.clone(),
			state,
		})?;

		match tokio::time::timeout(self.ctx.send_timeout, client.send_text(target_id, text)).await {
			Ok(Ok(())) => {
				debug!(target: "wsm.session", session = %self.id, recipient = %target_id, "message sent");
				Ok(())
			}
			Ok(Err(err)) => Err(Error::SendFailed {
				id: self.id.clone(),
				reason: err.to_string(),
			}),
			Err(_) => {
				warn!(target: "wsm.session", session = %self.id, recipient = %target_id, "send timed out");
				Err(Error::Timeout {
					ms: self.ctx.send_timeout.as_millis() as u64,
					operation: format!("send on session {}", self.id),
				})
			}
		}
	}

	/// Disconnects the client but keeps credentials on disk.
	pub async fn release(&self) {
		let client = self.client.lock().await.take();
		if let Some(client) = client {
			if let Err(err) = client.disconnect().await {
				debug!(target: "wsm.session", session = %self.id, error = %err, "disconnect on release failed");
			}
		}
	}

	/// Closes the client, drops any remote credential state and deletes the
	/// credential directory. Safe to call more than once.
	pub async fn teardown(&self) -> Result<()> {
		let client = self.client.lock().await.take();
		if let Some(client) = client {
			if let Err(err) = client.disconnect().await {
				debug!(target: "wsm.session", session = %self.id, error = %err, "disconnect on teardown failed");
			}
			if let Err(err) = client.forget().await {
				warn!(target: "wsm.session", session = %self.id, error = %err, "forgetting remote credentials failed");
			}
		}
		{
			let mut status = self.status.lock();
			status.last_qr = None;
			status.identity = None;
		}
		self.ctx.storage.remove(&self.id)
	}

	/// Moves the session to `Destroyed`. Returns false if it already was.
	pub fn mark_destroyed(&self, cause: Option<DisconnectCause>) -> bool {
		self.transition(SessionState::Destroyed, cause, None)
	}

	/// Applies a state change and publishes `StateChanged` when the state
	/// actually moved. Transitions out of `Destroyed` are refused.
	fn transition(&self, to: SessionState, cause: Option<DisconnectCause>, identity: Option<AccountIdentity>) -> bool {
		let from = {
			let mut status = self.status.lock();
			let from = status.state;
			if from.is_destroyed() {
				return false;
			}
			status.state = to;
			if to != SessionState::AwaitingPairing {
				status.last_qr = None;
			}
			match to {
				SessionState::Connected => status.identity = identity.clone(),
				SessionState::Disconnected | SessionState::Destroyed => status.identity = None,
				_ => {}
			}
			from
		};

		if from != to {
			debug!(target: "wsm.session", session = %self.id, from = %from, to = %to, "state changed");
			let identity = if to == SessionState::Connected { identity } else { None };
			self.ctx.broadcaster.publish(
				&self.id,
				SessionEvent::StateChanged {
					from,
					to,
					cause,
					identity,
				},
			);
		}
		true
	}

	fn destroyed(&self) -> Error {
		Error::Destroyed { id: self.id.clone() }
	}

	fn spawn_mirror(&self) {
		let mirror = Arc::clone(&self.ctx.hooks.mirror);
		let id = self.id.clone();
		let path = self.storage_path();
		tokio::spawn(async move {
			match mirror.mirror(&id, &path).await {
				Ok(()) => debug!(target: "wsm.mirror", session = %id, "credentials mirrored"),
				Err(err) => warn!(target: "wsm.mirror", session = %id, error = %err, "credential mirror failed"),
			}
		});
	}

	fn spawn_connected_notice(self: &Arc<Self>, account: AccountIdentity) {
		let handle = Arc::clone(self);
		tokio::spawn(async move {
			let Some(text) = handle.ctx.hooks.connected_notice.notice(&handle.id, &account).await else {
				return;
			};
			match handle.send(&account.id, &text).await {
				Ok(()) => debug!(target: "wsm.session", session = %handle.id, "connected notice sent"),
				Err(err) => warn!(target: "wsm.session", session = %handle.id, error = %err, "connected notice failed"),
			}
		});
	}

	fn spawn_auto_reply(self: &Arc<Self>, sender_id: String, text: String) {
		let handle = Arc::clone(self);
		tokio::spawn(async move {
			let Some(reply) = handle.ctx.hooks.auto_reply.reply(&handle.id, &sender_id, &text).await else {
				return;
			};
			if let Err(err) = handle.send(&sender_id, &reply).await {
				warn!(target: "wsm.session", session = %handle.id, sender = %sender_id, error = %err, "auto-reply failed");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;
	use tokio::sync::mpsc::UnboundedReceiver;
	use wsm_protocol::EventEnvelope;

	use super::*;
	use crate::client::{ClientError, RawMessage};
	use crate::testing::MockController;

	struct Fixture {
		_temp: TempDir,
		controller: MockController,
		handle: Arc<SessionHandle>,
		events: UnboundedReceiver<EventEnvelope>,
	}

	fn fixture(id: &str) -> Fixture {
		let temp = TempDir::new().unwrap();
		let controller = MockController::new();
		let broadcaster = EventBroadcaster::new();
		let (tx, events) = mpsc::unbounded_channel();
		broadcaster.subscribe(id, Arc::new(tx));
		let ctx = HandleContext {
			storage: Arc::new(CredentialStore::new(temp.path())),
			factory: controller.factory(),
			broadcaster,
			hooks: Hooks::default(),
			send_timeout: Duration::from_secs(1),
		};
		Fixture {
			_temp: temp,
			controller,
			handle: Arc::new(SessionHandle::new(id, ctx)),
			events,
		}
	}

	fn drain(rx: &mut UnboundedReceiver<EventEnvelope>) -> Vec<SessionEvent> {
		let mut out = Vec::new();
		while let Ok(envelope) = rx.try_recv() {
			out.push(envelope.event);
		}
		out
	}

	fn me() -> AccountIdentity {
		AccountIdentity {
			id: "15550000000@s.whatsapp.net".into(),
			name: "Me".into(),
		}
	}

	#[tokio::test]
	async fn initialize_creates_storage_and_emits_qr() {
		let mut fx = fixture("s1");
		let mut stream = fx.handle.initialize().await.unwrap();
		assert!(fx.handle.storage_path().join("creds.json").exists());
		assert_eq!(fx.handle.state(), SessionState::Connecting);

		let event = stream.recv().await.unwrap();
		assert!(matches!(event, ClientEvent::Qr(_)));
		assert_eq!(fx.handle.handle_event(event).await, None);
		assert_eq!(fx.handle.state(), SessionState::AwaitingPairing);
		assert!(fx.handle.last_qr().is_some());

		let events = drain(&mut fx.events);
		assert!(matches!(
			events.as_slice(),
			[
				SessionEvent::StateChanged {
					to: SessionState::Connecting,
					..
				},
				SessionEvent::StateChanged {
					to: SessionState::AwaitingPairing,
					..
				},
				SessionEvent::PairingChallenge { .. },
			]
		));
	}

	#[tokio::test]
	async fn ready_sets_identity_and_clears_qr() {
		let fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		fx.handle.handle_event(ClientEvent::Qr("qr".into())).await;
		fx.handle.handle_event(ClientEvent::Ready(me())).await;

		assert_eq!(fx.handle.state(), SessionState::Connected);
		assert_eq!(fx.handle.connected_identity(), Some(me()));
		assert_eq!(fx.handle.last_qr(), None);
	}

	#[tokio::test]
	async fn send_requires_connected_state() {
		let fx = fixture("s1");
		let err = fx.handle.send("u1", "hi").await.unwrap_err();
		assert!(matches!(
			err,
			Error::NotConnected {
				state: SessionState::Created,
				..
			}
		));

		fx.handle.initialize().await.unwrap();
		let err = fx.handle.send("u1", "hi").await.unwrap_err();
		assert!(matches!(err, Error::NotConnected { .. }));

		let client = fx.controller.client("s1").unwrap();
		assert!(client.sent().is_empty());
	}

	#[tokio::test]
	async fn send_failure_is_reported() {
		let fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		fx.handle.handle_event(ClientEvent::Ready(me())).await;

		fx.handle.send("u1", "first").await.unwrap();
		fx.controller.fail_sends(Some(ClientError::Transport("socket closed".into())));
		let err = fx.handle.send("u1", "second").await.unwrap_err();
		assert!(matches!(err, Error::SendFailed { .. }));

		let client = fx.controller.client("s1").unwrap();
		assert_eq!(client.sent(), vec![("u1".to_string(), "first".to_string())]);
	}

	#[tokio::test]
	async fn slow_send_times_out() {
		let fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		fx.handle.handle_event(ClientEvent::Ready(me())).await;
		fx.controller.send_delay(Some(Duration::from_secs(5)));

		let started = std::time::Instant::now();
		let err = fx.handle.send("u1", "slow").await.unwrap_err();
		assert!(started.elapsed() < Duration::from_secs(3));
		assert!(err.is_timeout());
		assert_eq!(err.code(), wsm_protocol::ErrorCode::Timeout);
		assert_eq!(err.to_string(), "timeout after 1000ms waiting for: send on session s1");
		assert!(fx.controller.client("s1").unwrap().sent().is_empty());
	}

	#[tokio::test]
	async fn disconnect_event_reports_cause() {
		let mut fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		fx.handle.handle_event(ClientEvent::Ready(me())).await;
		drain(&mut fx.events);

		let cause = fx
			.handle
			.handle_event(ClientEvent::Disconnected(DisconnectCause::NetworkError))
			.await;
		assert_eq!(cause, Some(DisconnectCause::NetworkError));
		assert_eq!(fx.handle.state(), SessionState::Disconnected);
		assert_eq!(fx.handle.connected_identity(), None);

		let events = drain(&mut fx.events);
		assert_eq!(
			events,
			vec![SessionEvent::StateChanged {
				from: SessionState::Connected,
				to: SessionState::Disconnected,
				cause: Some(DisconnectCause::NetworkError),
				identity: None,
			}]
		);

		// Re-initializing after a handled disconnect opens a new client.
		fx.handle.initialize().await.unwrap();
		assert_eq!(fx.controller.clients_created("s1"), 2);
	}

	#[tokio::test]
	async fn connect_failure_maps_to_initialization_failed() {
		let fx = fixture("s1");
		fx.controller.fail_next_connects(1, ClientError::Auth("rejected".into()));

		let err = fx.handle.initialize().await.unwrap_err();
		assert!(matches!(err, Error::InitializationFailed { .. }));
		assert_eq!(fx.handle.state(), SessionState::Disconnected);
	}

	#[tokio::test]
	async fn teardown_is_idempotent_and_removes_storage() {
		let fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		let path = fx.handle.storage_path();
		assert!(path.exists());

		assert!(fx.handle.mark_destroyed(None));
		fx.handle.teardown().await.unwrap();
		fx.handle.teardown().await.unwrap();
		assert!(!path.exists());

		let client = fx.controller.client("s1").unwrap();
		assert!(client.is_forgotten());
		assert!(!client.is_connected());
	}

	#[tokio::test]
	async fn destroyed_is_terminal() {
		let fx = fixture("s1");
		assert!(fx.handle.mark_destroyed(Some(DisconnectCause::LoggedOut)));
		assert!(!fx.handle.mark_destroyed(None));

		assert!(matches!(fx.handle.initialize().await, Err(Error::Destroyed { .. })));
		fx.handle.handle_event(ClientEvent::Ready(me())).await;
		assert_eq!(fx.handle.state(), SessionState::Destroyed);
	}

	#[tokio::test]
	async fn inbound_text_is_published() {
		let mut fx = fixture("s1");
		fx.handle.initialize().await.unwrap();
		drain(&mut fx.events);

		fx.handle
			.handle_event(ClientEvent::Message(RawMessage::text("u1@s.whatsapp.net", "hello")))
			.await;

		let events = drain(&mut fx.events);
		assert!(matches!(
			events.as_slice(),
			[SessionEvent::InboundMessage { sender_id, .. }] if sender_id == "u1@s.whatsapp.net"
		));
	}
}
