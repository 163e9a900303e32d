//! Scriptable in-memory client for tests and the `mock` backend.
//!
//! [`MockController`] hands out a [`ClientFactory`] and keeps track of every
//! client it opened, so a test can play the WhatsApp side of a session:
//!
//! ```ignore
//! let controller = MockController::new();
//! let manager = SessionManager::new(config, controller.factory(), Hooks::default());
//! manager.create_session(Some("s1"))?;
//! controller.wait_for_connected("s1", Duration::from_secs(1)).await;
//! controller.ready("s1", "15551234567@s.whatsapp.net");
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use wsm_protocol::{AccountIdentity, DisconnectCause};

use crate::client::{ClientError, ClientEvent, ClientFactory, EventSink, RawMessage, WhatsAppClient};

/// File the mock client writes into its storage directory on connect.
pub const MOCK_CREDENTIALS_FILE: &str = "creds.json";

#[derive(Debug, Default)]
struct Behavior {
	/// Skip the automatic QR on connect.
	silent_connect: bool,
	connect_failures: u32,
	connect_error: Option<ClientError>,
	send_error: Option<ClientError>,
	connect_delay: Option<Duration>,
	send_delay: Option<Duration>,
}

#[derive(Default)]
struct ControllerInner {
	behavior: Mutex<Behavior>,
	clients: Mutex<HashMap<String, Arc<MockClient>>>,
	created: Mutex<HashMap<String, usize>>,
}

/// Test-side handle over every mock client opened through its factory.
#[derive(Clone, Default)]
pub struct MockController {
	inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for MockController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MockController")
			.field("clients", &self.inner.clients.lock().len())
			.finish()
	}
}

impl MockController {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn factory(&self) -> Arc<dyn ClientFactory> {
		Arc::new(MockClientFactory {
			controller: self.clone(),
		})
	}

	/// Stops clients from issuing a QR code as soon as they connect.
	pub fn silent_connect(&self, silent: bool) {
		self.inner.behavior.lock().silent_connect = silent;
	}

	/// Makes the next `count` connects fail with `error`.
	pub fn fail_next_connects(&self, count: u32, error: ClientError) {
		let mut behavior = self.inner.behavior.lock();
		behavior.connect_failures = count;
		behavior.connect_error = Some(error);
	}

	/// Makes every send fail with `error` until reset with `None`.
	pub fn fail_sends(&self, error: Option<ClientError>) {
		self.inner.behavior.lock().send_error = error;
	}

	/// Delays every connect, for exercising initialize timeouts.
	pub fn connect_delay(&self, delay: Option<Duration>) {
		self.inner.behavior.lock().connect_delay = delay;
	}

	/// Delays every send, for exercising send timeouts.
	pub fn send_delay(&self, delay: Option<Duration>) {
		self.inner.behavior.lock().send_delay = delay;
	}

	/// Latest client opened for the session.
	pub fn client(&self, session_id: &str) -> Option<Arc<MockClient>> {
		self.inner.clients.lock().get(session_id).cloned()
	}

	/// How many clients the factory created for the session so far.
	pub fn clients_created(&self, session_id: &str) -> usize {
		self.inner.created.lock().get(session_id).copied().unwrap_or(0)
	}

	/// Waits until the session's latest client has an open connection.
	pub async fn wait_for_connected(&self, session_id: &str, timeout: Duration) -> Option<Arc<MockClient>> {
		let found = wait_until(timeout, || {
			self.client(session_id).map(|c| c.is_connected()).unwrap_or(false)
		})
		.await;
		if found { self.client(session_id) } else { None }
	}

	/// Pushes a raw event as if the library emitted it. Returns false when
	/// the session has no connected client.
	pub fn emit(&self, session_id: &str, event: ClientEvent) -> bool {
		self.client(session_id).map(|c| c.emit(event)).unwrap_or(false)
	}

	pub fn qr(&self, session_id: &str, payload: &str) -> bool {
		self.emit(session_id, ClientEvent::Qr(payload.to_string()))
	}

	pub fn ready(&self, session_id: &str, account_id: &str) -> bool {
		self.emit(
			session_id,
			ClientEvent::Ready(AccountIdentity {
				id: account_id.to_string(),
				name: "User".to_string(),
			}),
		)
	}

	pub fn disconnect(&self, session_id: &str, cause: DisconnectCause) -> bool {
		self.emit(session_id, ClientEvent::Disconnected(cause))
	}

	pub fn message(&self, session_id: &str, message: RawMessage) -> bool {
		self.emit(session_id, ClientEvent::Message(message))
	}
}

/// [`ClientFactory`] backed by a [`MockController`].
pub struct MockClientFactory {
	controller: MockController,
}

impl ClientFactory for MockClientFactory {
	fn create(&self, session_id: &str, storage: &Path) -> Result<Arc<dyn WhatsAppClient>, ClientError> {
		let client = Arc::new(MockClient {
			session_id: session_id.to_string(),
			storage: storage.to_path_buf(),
			controller: self.controller.clone(),
			sink: Mutex::new(None),
			sent: Mutex::new(Vec::new()),
			connects: AtomicUsize::new(0),
			forgotten: AtomicBool::new(false),
		});
		let inner = &self.controller.inner;
		*inner.created.lock().entry(session_id.to_string()).or_default() += 1;
		inner.clients.lock().insert(session_id.to_string(), Arc::clone(&client));
		Ok(client)
	}
}

/// In-memory client; records sends and writes a fake credential file.
pub struct MockClient {
	session_id: String,
	storage: PathBuf,
	controller: MockController,
	sink: Mutex<Option<EventSink>>,
	sent: Mutex<Vec<(String, String)>>,
	connects: AtomicUsize,
	forgotten: AtomicBool,
}

impl MockClient {
	pub fn is_connected(&self) -> bool {
		self.sink.lock().is_some()
	}

	pub fn is_forgotten(&self) -> bool {
		self.forgotten.load(Ordering::SeqCst)
	}

	pub fn connect_count(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	/// `(target, text)` pairs sent through this client.
	pub fn sent(&self) -> Vec<(String, String)> {
		self.sent.lock().clone()
	}

	pub fn emit(&self, event: ClientEvent) -> bool {
		match self.sink.lock().as_ref() {
			Some(sink) => sink.send(event).is_ok(),
			None => false,
		}
	}
}

#[async_trait]
impl WhatsAppClient for MockClient {
	async fn connect(&self, events: EventSink) -> Result<(), ClientError> {
		let delay = self.controller.inner.behavior.lock().connect_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let (failure, silent) = {
			let mut behavior = self.controller.inner.behavior.lock();
			let failure = if behavior.connect_failures > 0 {
				behavior.connect_failures -= 1;
				Some(behavior.connect_error.clone().unwrap_or(ClientError::Transport("mock connect failure".into())))
			} else {
				None
			};
			(failure, behavior.silent_connect)
		};
		if let Some(err) = failure {
			return Err(err);
		}

		std::fs::create_dir_all(&self.storage).map_err(|e| ClientError::Transport(e.to_string()))?;
		std::fs::write(
			self.storage.join(MOCK_CREDENTIALS_FILE),
			format!("{{\"session\":\"{}\"}}", self.session_id),
		)
		.map_err(|e| ClientError::Transport(e.to_string()))?;

		let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
		if !silent {
			let _ = events.send(ClientEvent::Qr(format!("mock-qr:{}:{n}", self.session_id)));
		}
		*self.sink.lock() = Some(events);
		debug!(target: "wsm.mock", session = %self.session_id, "mock client connected");
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), ClientError> {
		self.sink.lock().take();
		Ok(())
	}

	async fn send_text(&self, target_id: &str, text: &str) -> Result<(), ClientError> {
		let delay = self.controller.inner.behavior.lock().send_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let error = self.controller.inner.behavior.lock().send_error.clone();
		if let Some(err) = error {
			return Err(err);
		}
		if !self.is_connected() {
			return Err(ClientError::Closed);
		}
		self.sent.lock().push((target_id.to_string(), text.to_string()));
		Ok(())
	}

	async fn forget(&self) -> Result<(), ClientError> {
		self.forgotten.store(true, Ordering::SeqCst);
		Ok(())
	}
}

/// Polls `predicate` every few milliseconds until it holds or `timeout`
/// passes. Returns whether it held.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if predicate() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}
