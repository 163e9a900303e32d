//! Session lifecycle against the in-memory client.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use wsm::protocol::{DisconnectCause, EventEnvelope, MessageContent, SessionEvent, SessionState};
use wsm::testing::{MockController, wait_until};
use wsm::{
	ClientError, CredentialMirror, DeliveryError, Error, FnSubscriber, Hooks, KeywordAutoReply, KeywordRule,
	ManagerConfig, MirrorError, RawMessage, ReconnectPolicy, SessionManager, TextNotice,
};

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
	temp: TempDir,
	controller: MockController,
	manager: Arc<SessionManager>,
}

impl Harness {
	fn new() -> Self {
		Self::with(|config| config, Hooks::default())
	}

	fn with(configure: impl FnOnce(ManagerConfig) -> ManagerConfig, hooks: Hooks) -> Self {
		let temp = TempDir::new().unwrap();
		let controller = MockController::new();
		let config = configure(
			ManagerConfig::new(temp.path().join("sessions"))
				.with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(20))),
		);
		let manager = SessionManager::new(config, controller.factory(), hooks);
		Self {
			temp,
			controller,
			manager,
		}
	}

	fn storage(&self, id: &str) -> std::path::PathBuf {
		self.temp.path().join("sessions").join(id)
	}

	fn subscribe(&self, id: &str) -> UnboundedReceiver<EventEnvelope> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.manager.subscribe(id, Arc::new(tx));
		rx
	}

	async fn connect(&self, id: &str, account: &str) {
		self.controller
			.wait_for_connected(id, WAIT)
			.await
			.expect("client never connected");
		assert!(self.controller.ready(id, account));
		let manager = Arc::clone(&self.manager);
		let id = id.to_string();
		assert!(
			wait_until(WAIT, || manager
				.session_summary(&id)
				.map(|s| s.state == SessionState::Connected)
				.unwrap_or(false))
			.await,
			"session never reached connected"
		);
	}

	async fn state_becomes(&self, id: &str, state: SessionState) -> bool {
		wait_until(WAIT, || {
			self.manager
				.session_summary(id)
				.map(|s| s.state == state)
				.unwrap_or(false)
		})
		.await
	}

	async fn gone(&self, id: &str) -> bool {
		wait_until(WAIT, || self.manager.session_summary(id).is_err()).await
	}
}

async fn next_matching(
	rx: &mut UnboundedReceiver<EventEnvelope>,
	mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> EventEnvelope {
	tokio::time::timeout(WAIT, async {
		loop {
			let envelope = rx.recv().await.expect("event stream closed");
			if predicate(&envelope.event) {
				return envelope;
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}

fn changed_to(state: SessionState) -> impl FnMut(&SessionEvent) -> bool {
	move |event| matches!(event, SessionEvent::StateChanged { to, .. } if *to == state)
}

#[tokio::test]
async fn create_pair_send_delete() {
	let h = Harness::new();
	let mut events = h.subscribe("s1");

	let created = h.manager.create_session(Some("s1")).unwrap();
	assert_eq!(created.id, "s1");
	assert_eq!(created.initial_state, SessionState::Created);

	let challenge = next_matching(&mut events, |e| matches!(e, SessionEvent::PairingChallenge { .. })).await;
	assert_eq!(challenge.session_id, "s1");
	assert!(h.storage("s1").exists());

	h.connect("s1", "15551234567@s.whatsapp.net").await;
	let connected = next_matching(&mut events, changed_to(SessionState::Connected)).await;
	match connected.event {
		SessionEvent::StateChanged { identity, .. } => {
			assert_eq!(identity.unwrap().id, "15551234567@s.whatsapp.net");
		}
		other => panic!("unexpected event: {other:?}"),
	}

	let summary = h.manager.session_summary("s1").unwrap();
	assert_eq!(summary.connected_identity.unwrap().id, "15551234567@s.whatsapp.net");

	h.manager.send_message("s1", "u1", "hello").await.unwrap();
	let client = h.controller.client("s1").unwrap();
	assert_eq!(client.sent(), vec![("u1".to_string(), "hello".to_string())]);

	h.manager.delete_session("s1").await.unwrap();
	assert!(!h.storage("s1").exists());
	assert!(h.manager.list_sessions().iter().all(|s| s.id != "s1"));
	assert!(client.is_forgotten());

	let destroyed = next_matching(&mut events, changed_to(SessionState::Destroyed)).await;
	assert!(matches!(destroyed.event, SessionEvent::StateChanged { cause: None, .. }));

	assert!(matches!(
		h.manager.send_message("s1", "u1", "again").await,
		Err(Error::NotFound { .. })
	));
	assert!(matches!(h.manager.delete_session("s1").await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn duplicate_create_until_deleted() {
	let h = Harness::new();
	h.manager.create_session(Some("s1")).unwrap();
	assert!(matches!(
		h.manager.create_session(Some("s1")),
		Err(Error::AlreadyExists { .. })
	));

	h.manager.delete_session("s1").await.unwrap();
	let again = h.manager.create_session(Some("s1")).unwrap();
	assert_eq!(again.id, "s1");
	assert_eq!(h.manager.list_sessions().len(), 1);
}

#[tokio::test]
async fn generated_ids_are_listed_in_creation_order() {
	let h = Harness::new();
	let a = h.manager.create_session(None).unwrap();
	let b = h.manager.create_session(None).unwrap();
	let c = h.manager.create_session(Some("named")).unwrap();

	let ids: Vec<String> = h.manager.list_sessions().into_iter().map(|s| s.id).collect();
	assert_eq!(ids, vec![a.id, b.id, c.id]);
}

#[tokio::test]
async fn late_subscriber_gets_connected_status() {
	let h = Harness::new();
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	let mut late = h.subscribe("s1");
	let status = h.manager.current_status("s1").unwrap();
	assert_eq!(status.state, SessionState::Connected);
	assert_eq!(status.connected_identity.unwrap().id, "me@s.whatsapp.net");
	assert!(late.try_recv().is_err());
}

#[tokio::test]
async fn send_before_pairing_is_not_connected() {
	let h = Harness::new();
	let mut events = h.subscribe("s1");
	h.manager.create_session(Some("s1")).unwrap();
	next_matching(&mut events, |e| matches!(e, SessionEvent::PairingChallenge { .. })).await;

	let err = h.manager.send_message("s1", "u1", "too early").await.unwrap_err();
	assert!(matches!(
		err,
		Error::NotConnected {
			state: SessionState::AwaitingPairing,
			..
		}
	));
	assert!(h.controller.client("s1").unwrap().sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_has_one_winner() {
	let h = Harness::new();
	let tasks: Vec<_> = (0..16)
		.map(|_| {
			let manager = Arc::clone(&h.manager);
			tokio::spawn(async move { manager.create_session(Some("shared")) })
		})
		.collect();

	let mut ok = 0;
	let mut rejected = 0;
	for task in tasks {
		match task.await.unwrap() {
			Ok(_) => ok += 1,
			Err(Error::AlreadyExists { .. }) => rejected += 1,
			Err(other) => panic!("unexpected error: {other}"),
		}
	}
	assert_eq!(ok, 1);
	assert_eq!(rejected, 15);
	assert_eq!(h.manager.list_sessions().len(), 1);
}

#[tokio::test]
async fn logged_out_destroys_session() {
	let h = Harness::new();
	let mut events = h.subscribe("s1");
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	assert!(h.controller.disconnect("s1", DisconnectCause::LoggedOut));

	let dropped = next_matching(&mut events, changed_to(SessionState::Disconnected)).await;
	assert!(matches!(
		dropped.event,
		SessionEvent::StateChanged {
			cause: Some(DisconnectCause::LoggedOut),
			..
		}
	));
	let destroyed = next_matching(&mut events, changed_to(SessionState::Destroyed)).await;
	assert!(matches!(
		destroyed.event,
		SessionEvent::StateChanged {
			cause: Some(DisconnectCause::LoggedOut),
			..
		}
	));

	assert!(h.gone("s1").await);
	let storage = h.storage("s1");
	assert!(wait_until(WAIT, || !storage.exists()).await);
	assert_eq!(h.controller.clients_created("s1"), 1);
}

#[tokio::test]
async fn network_error_reconnects_with_same_storage() {
	let h = Harness::new();
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	let first = h.controller.client("s1").unwrap();
	assert!(h.controller.disconnect("s1", DisconnectCause::NetworkError));

	let controller = h.controller.clone();
	assert!(wait_until(WAIT, || controller.clients_created("s1") == 2).await);
	assert!(h.state_becomes("s1", SessionState::AwaitingPairing).await);
	assert!(h.storage("s1").exists());

	let second = h.controller.client("s1").unwrap();
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(first.connect_count(), 1);
	assert!(!first.is_connected());
	assert!(!first.is_forgotten());
	assert_eq!(second.connect_count(), 1);
}

#[tokio::test]
async fn delete_cancels_pending_retry() {
	let h = Harness::with(
		|config| config.with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(300))),
		Hooks::default(),
	);
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	assert!(h.controller.disconnect("s1", DisconnectCause::ServerRestart));
	assert!(h.state_becomes("s1", SessionState::Disconnected).await);

	h.manager.delete_session("s1").await.unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;

	assert_eq!(h.controller.clients_created("s1"), 1);
	assert!(!h.storage("s1").exists());
	assert!(h.manager.list_sessions().is_empty());
}

#[tokio::test]
async fn delete_during_stuck_handshake_returns_promptly() {
	let h = Harness::new();
	h.controller.connect_delay(Some(Duration::from_secs(10)));
	h.manager.create_session(Some("s1")).unwrap();
	assert!(h.state_becomes("s1", SessionState::Connecting).await);
	assert!(h.storage("s1").exists());

	tokio::time::timeout(Duration::from_secs(1), h.manager.delete_session("s1"))
		.await
		.expect("delete waited for the handshake")
		.unwrap();
	assert!(!h.storage("s1").exists());
	assert!(h.manager.list_sessions().is_empty());
	assert!(h.manager.current_status("s1").is_none());

	h.controller.connect_delay(None);
	h.manager.create_session(Some("s2")).unwrap();
	assert!(h.state_becomes("s2", SessionState::AwaitingPairing).await);
}

#[tokio::test]
async fn recreated_id_keeps_status_while_predecessor_tears_down() {
	let h = Harness::new();
	h.controller.connect_delay(Some(Duration::from_secs(10)));
	h.manager.create_session(Some("s1")).unwrap();
	assert!(h.state_becomes("s1", SessionState::Connecting).await);
	h.controller.connect_delay(None);

	// The delete parks on the stuck handshake's client slot, so the
	// re-create lands while the old session is still tearing down.
	let (deleted, created) = tokio::join!(h.manager.delete_session("s1"), async {
		h.manager.create_session(Some("s1"))
	});
	deleted.unwrap();
	assert_eq!(created.unwrap().initial_state, SessionState::Created);

	let status = h.manager.current_status("s1").expect("status of the new session was cleared");
	assert!(!status.state.is_destroyed());

	assert!(h.state_becomes("s1", SessionState::AwaitingPairing).await);
	assert_eq!(h.manager.current_status("s1").unwrap().state, SessionState::AwaitingPairing);
	assert!(h.storage("s1").exists());
}

#[tokio::test]
async fn panicking_subscriber_does_not_stall_session() {
	let h = Harness::new();
	let seen = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&seen);
	h.manager.subscribe(
		"s1",
		Arc::new(FnSubscriber(move |_: &EventEnvelope| -> Result<(), DeliveryError> {
			if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
				panic!("subscriber bug on third event");
			}
			Ok(())
		})),
	);
	let mut events = h.subscribe("s1");

	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	next_matching(&mut events, changed_to(SessionState::Connected)).await;
	assert!(seen.load(Ordering::SeqCst) > 3);
	assert_eq!(h.manager.broadcaster().subscriber_count("s1"), 2);
	h.manager.send_message("s1", "u1", "still here").await.unwrap();
}

#[tokio::test]
async fn failed_initialization_is_retried() {
	let h = Harness::new();
	h.controller
		.fail_next_connects(2, ClientError::Transport("connection refused".into()));

	h.manager.create_session(Some("s1")).unwrap();

	assert!(h.state_becomes("s1", SessionState::AwaitingPairing).await);
	assert_eq!(h.controller.clients_created("s1"), 3);
}

#[tokio::test]
async fn rejected_credentials_at_startup_destroy_session() {
	let h = Harness::new();
	h.controller.fail_next_connects(1, ClientError::Auth("401".into()));

	h.manager.create_session(Some("s1")).unwrap();

	assert!(h.gone("s1").await);
	assert!(h.manager.list_sessions().is_empty());
	assert_eq!(h.controller.clients_created("s1"), 1);
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
	let h = Harness::with(
		|config| config.with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_attempts(1)),
		Hooks::default(),
	);
	h.controller
		.fail_next_connects(10, ClientError::Transport("unreachable".into()));

	h.manager.create_session(Some("s1")).unwrap();

	assert!(h.gone("s1").await);
	assert_eq!(h.controller.clients_created("s1"), 2);
}

#[tokio::test]
async fn initialize_timeout_counts_as_network_error() {
	let h = Harness::with(
		|config| {
			config
				.with_initialize_timeout(Duration::from_millis(30))
				.with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(60)))
		},
		Hooks::default(),
	);
	h.controller.connect_delay(Some(Duration::from_millis(500)));

	h.manager.create_session(Some("s1")).unwrap();

	assert!(h.state_becomes("s1", SessionState::Disconnected).await);
	let status = h.manager.current_status("s1").unwrap();
	assert_eq!(status.last_cause, Some(DisconnectCause::NetworkError));
}

#[tokio::test]
async fn shutdown_keeps_credentials_for_restore() {
	let h = Harness::new();
	h.manager.create_session(Some("a")).unwrap();
	h.manager.create_session(Some("b")).unwrap();
	h.controller.wait_for_connected("a", WAIT).await.unwrap();
	h.controller.wait_for_connected("b", WAIT).await.unwrap();

	h.manager.shutdown().await;
	assert!(h.manager.list_sessions().is_empty());
	assert!(!h.controller.client("a").unwrap().is_connected());
	assert!(h.storage("a").exists());
	assert!(h.storage("b").exists());

	let restarted = SessionManager::new(
		ManagerConfig::new(h.temp.path().join("sessions")),
		h.controller.factory(),
		Hooks::default(),
	);
	let mut restored = restarted.restore_sessions().unwrap();
	restored.sort();
	assert_eq!(restored, vec!["a".to_string(), "b".to_string()]);
	assert_eq!(restarted.list_sessions().len(), 2);
	restarted.shutdown().await;
}

#[tokio::test]
async fn keyword_auto_reply_answers_text() {
	let hooks = Hooks::default().with_auto_reply(Arc::new(KeywordAutoReply::new(vec![KeywordRule {
		keyword: "hi".into(),
		reply: "Hello! How can I help you?".into(),
	}])));
	let h = Harness::with(|config| config, hooks);
	let mut events = h.subscribe("s1");
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	assert!(h.controller.message("s1", RawMessage::text("u1@s.whatsapp.net", "Hi")));

	let inbound = next_matching(&mut events, |e| matches!(e, SessionEvent::InboundMessage { .. })).await;
	match inbound.event {
		SessionEvent::InboundMessage {
			sender_id, content, ..
		} => {
			assert_eq!(sender_id, "u1@s.whatsapp.net");
			assert_eq!(content, MessageContent::Text { text: "Hi".into() });
		}
		other => panic!("unexpected event: {other:?}"),
	}

	let client = h.controller.client("s1").unwrap();
	assert!(wait_until(WAIT, || !client.sent().is_empty()).await);
	assert_eq!(
		client.sent(),
		vec![("u1@s.whatsapp.net".to_string(), "Hello! How can I help you?".to_string())]
	);
}

#[derive(Default)]
struct CountingMirror {
	calls: AtomicUsize,
}

#[async_trait]
impl CredentialMirror for CountingMirror {
	async fn mirror(&self, _session_id: &str, storage: &Path) -> Result<(), MirrorError> {
		assert!(storage.exists());
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[tokio::test]
async fn credentials_mirrored_once_per_pairing() {
	let mirror = Arc::new(CountingMirror::default());
	let hooks = Hooks::default().with_mirror(Arc::clone(&mirror) as Arc<dyn CredentialMirror>);
	let h = Harness::with(|config| config, hooks);
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	assert!(wait_until(WAIT, || mirror.calls.load(Ordering::SeqCst) == 1).await);

	// Resuming from stored credentials is not a new pairing.
	h.controller.silent_connect(true);
	assert!(h.controller.disconnect("s1", DisconnectCause::NetworkError));
	let controller = h.controller.clone();
	assert!(wait_until(WAIT, || controller.clients_created("s1") == 2).await);
	h.connect("s1", "me@s.whatsapp.net").await;

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(mirror.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fresh_pairing_notifies_own_chat() {
	let hooks = Hooks::default().with_connected_notice(Arc::new(TextNotice::new("Session {session} connected.")));
	let h = Harness::with(|config| config, hooks);
	h.manager.create_session(Some("s1")).unwrap();
	h.connect("s1", "me@s.whatsapp.net").await;

	let client = h.controller.client("s1").unwrap();
	assert!(wait_until(WAIT, || !client.sent().is_empty()).await);
	assert_eq!(
		client.sent(),
		vec![("me@s.whatsapp.net".to_string(), "Session s1 connected.".to_string())]
	);

	h.controller.silent_connect(true);
	assert!(h.controller.disconnect("s1", DisconnectCause::NetworkError));
	let controller = h.controller.clone();
	assert!(wait_until(WAIT, || controller.clients_created("s1") == 2).await);
	h.connect("s1", "me@s.whatsapp.net").await;

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(h.controller.client("s1").unwrap().sent().is_empty());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
	let h = Harness::new();
	let (tx, mut rx) = mpsc::unbounded_channel();
	let subscription = h.manager.subscribe("s1", Arc::new(tx));
	h.manager.unsubscribe(&subscription);
	h.manager.unsubscribe(&subscription);

	h.manager.create_session(Some("s1")).unwrap();
	h.controller.wait_for_connected("s1", WAIT).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(rx.try_recv().is_err());
}
