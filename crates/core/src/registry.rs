//! The process-wide table of sessions.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wsm_protocol::{SessionState, SessionSummary};

use crate::error::{Error, Result};
use crate::handle::SessionHandle;
use crate::id::{generate_session_id, validate_session_id};

/// One registry entry: the handle plus the bookkeeping that ties its
/// supervisor task to the session's identity.
pub struct Session {
	handle: Arc<SessionHandle>,
	created_at_ms: u64,
	cancel: CancellationToken,
	released: watch::Sender<bool>,
	supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.handle.id())
			.field("state", &self.handle.state())
			.field("created_at_ms", &self.created_at_ms)
			.finish_non_exhaustive()
	}
}

impl Session {
	pub fn new(handle: SessionHandle) -> Self {
		let (released, _) = watch::channel(false);
		Self {
			handle: Arc::new(handle),
			created_at_ms: wsm_protocol::now_ms(),
			cancel: CancellationToken::new(),
			released,
			supervisor: Mutex::new(None),
		}
	}

	pub fn id(&self) -> &str {
		self.handle.id()
	}

	pub fn handle(&self) -> &Arc<SessionHandle> {
		&self.handle
	}

	pub fn state(&self) -> SessionState {
		self.handle.state()
	}

	pub fn created_at_ms(&self) -> u64 {
		self.created_at_ms
	}

	pub fn summary(&self) -> SessionSummary {
		SessionSummary {
			id: self.id().to_string(),
			state: self.handle.state(),
			connected_identity: self.handle.connected_identity(),
			created_at_ms: self.created_at_ms,
		}
	}

	/// Cancelled when the session is deleted, destroyed or shut down.
	pub(crate) fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub(crate) fn set_supervisor(&self, task: JoinHandle<()>) {
		*self.supervisor.lock() = Some(task);
	}

	pub(crate) fn take_supervisor(&self) -> Option<JoinHandle<()>> {
		self.supervisor.lock().take()
	}

	/// Signals that the client and credential directory are no longer in use.
	pub(crate) fn mark_released(&self) {
		self.released.send_replace(true);
	}

	pub(crate) async fn wait_released(&self) {
		let mut rx = self.released.subscribe();
		let _ = rx.wait_for(|released| *released).await;
	}
}

/// Sessions keyed by id, in insertion order.
///
/// A single mutex guards the map; no await happens while it is held.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	sessions: Mutex<IndexMap<String, Arc<Session>>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a new session.
	///
	/// Without an id (or with an empty one) a fresh `session_<millis>` id is
	/// generated. A live session with the same id fails with
	/// `AlreadyExists`. A `Destroyed` entry still finishing its teardown is
	/// replaced and returned as the predecessor so the caller can wait for
	/// it to release its storage.
	pub fn create(
		&self,
		requested: Option<&str>,
		build: impl FnOnce(String) -> Session,
	) -> Result<(Arc<Session>, Option<Arc<Session>>)> {
		let requested = requested.filter(|id| !id.is_empty());
		if let Some(id) = requested {
			validate_session_id(id)?;
		}

		let mut sessions = self.sessions.lock();
		let id = match requested {
			Some(id) => {
				if sessions.get(id).is_some_and(|existing| !existing.state().is_destroyed()) {
					return Err(Error::AlreadyExists { id: id.to_string() });
				}
				id.to_string()
			}
			None => loop {
				let id = generate_session_id();
				if !sessions.contains_key(&id) {
					break id;
				}
			},
		};

		let session = Arc::new(build(id.clone()));
		let predecessor = sessions.shift_remove(&id);
		sessions.insert(id.clone(), Arc::clone(&session));
		debug!(target: "wsm.registry", session = %id, replaced = predecessor.is_some(), "session registered");
		Ok((session, predecessor))
	}

	/// Looks up a session that is not destroyed.
	pub fn get(&self, id: &str) -> Result<Arc<Session>> {
		self.sessions
			.lock()
			.get(id)
			.filter(|session| !session.state().is_destroyed())
			.cloned()
			.ok_or_else(|| Error::not_found(id))
	}

	pub fn contains(&self, id: &str) -> bool {
		self.get(id).is_ok()
	}

	/// Snapshot of every live session, in insertion order.
	pub fn list(&self) -> Vec<SessionSummary> {
		let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
		sessions
			.iter()
			.map(|session| session.summary())
			.filter(|summary| !summary.state.is_destroyed())
			.collect()
	}

	/// Drops the entry for `id`. Absent ids are ignored.
	pub fn remove(&self, id: &str) {
		if self.sessions.lock().shift_remove(id).is_some() {
			debug!(target: "wsm.registry", session = %id, "session removed");
		}
	}

	/// Drops `session` only if it is still the entry registered under its id.
	pub fn remove_session(&self, session: &Arc<Session>) {
		let mut sessions = self.sessions.lock();
		if sessions.get(session.id()).is_some_and(|current| Arc::ptr_eq(current, session)) {
			sessions.shift_remove(session.id());
			debug!(target: "wsm.registry", session = %session.id(), "session removed");
		}
	}

	/// Empties the table, returning what was in it.
	pub fn drain(&self) -> Vec<Arc<Session>> {
		self.sessions.lock().drain(..).map(|(_, session)| session).collect()
	}

	/// Number of entries, including destroyed ones still tearing down.
	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tempfile::TempDir;

	use super::*;
	use crate::broadcast::EventBroadcaster;
	use crate::handle::HandleContext;
	use crate::hooks::Hooks;
	use crate::storage::CredentialStore;
	use crate::testing::MockController;

	fn builder(temp: &TempDir) -> impl Fn(String) -> Session + Clone + use<> {
		let ctx = HandleContext {
			storage: Arc::new(CredentialStore::new(temp.path())),
			factory: MockController::new().factory(),
			broadcaster: EventBroadcaster::new(),
			hooks: Hooks::default(),
			send_timeout: Duration::from_secs(1),
		};
		move |id| Session::new(SessionHandle::new(id, ctx.clone()))
	}

	#[test]
	fn duplicate_create_is_rejected() {
		let temp = TempDir::new().unwrap();
		let build = builder(&temp);
		let registry = SessionRegistry::new();

		registry.create(Some("s1"), build.clone()).unwrap();
		let err = registry.create(Some("s1"), build.clone()).unwrap_err();
		assert!(matches!(err, Error::AlreadyExists { ref id } if id == "s1"));
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn destroyed_entry_can_be_recreated() {
		let temp = TempDir::new().unwrap();
		let build = builder(&temp);
		let registry = SessionRegistry::new();

		let (first, _) = registry.create(Some("s1"), build.clone()).unwrap();
		first.handle().mark_destroyed(None);
		assert!(matches!(registry.get("s1"), Err(Error::NotFound { .. })));

		let (second, predecessor) = registry.create(Some("s1"), build.clone()).unwrap();
		assert!(Arc::ptr_eq(&predecessor.unwrap(), &first));

		// The old session's cleanup must not evict its replacement.
		registry.remove_session(&first);
		assert!(Arc::ptr_eq(&registry.get("s1").unwrap(), &second));
	}

	#[test]
	fn generated_ids_do_not_collide() {
		let temp = TempDir::new().unwrap();
		let build = builder(&temp);
		let registry = SessionRegistry::new();

		let (a, _) = registry.create(None, build.clone()).unwrap();
		let (b, _) = registry.create(Some(""), build.clone()).unwrap();
		assert_ne!(a.id(), b.id());
		assert!(a.id().starts_with("session_"));
	}

	#[test]
	fn invalid_ids_are_rejected() {
		let temp = TempDir::new().unwrap();
		let registry = SessionRegistry::new();
		let err = registry.create(Some("../escape"), builder(&temp)).unwrap_err();
		assert!(matches!(err, Error::InvalidSessionId { .. }));
		assert!(registry.is_empty());
	}

	#[test]
	fn list_keeps_insertion_order() {
		let temp = TempDir::new().unwrap();
		let build = builder(&temp);
		let registry = SessionRegistry::new();
		for id in ["c", "a", "b"] {
			registry.create(Some(id), build.clone()).unwrap();
		}
		let ids: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
		assert_eq!(ids, vec!["c", "a", "b"]);
	}

	#[test]
	fn remove_is_idempotent() {
		let temp = TempDir::new().unwrap();
		let registry = SessionRegistry::new();
		registry.create(Some("s1"), builder(&temp)).unwrap();

		registry.remove("s1");
		registry.remove("s1");
		registry.remove("never-existed");
		assert!(registry.get("s1").is_err());
	}

	#[test]
	fn concurrent_create_same_id_has_one_winner() {
		let temp = TempDir::new().unwrap();
		let build = builder(&temp);
		let registry = Arc::new(SessionRegistry::new());

		let threads: Vec<_> = (0..8)
			.map(|_| {
				let registry = Arc::clone(&registry);
				let build = build.clone();
				std::thread::spawn(move || registry.create(Some("shared"), build).is_ok())
			})
			.collect();
		let winners = threads.into_iter().map(|t| t.join().unwrap()).filter(|ok| *ok).count();

		assert_eq!(winners, 1);
		assert_eq!(registry.len(), 1);
	}
}
