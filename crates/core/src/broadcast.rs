//! Per-session pub/sub for normalized events.
//!
//! Subscribers are grouped by session id. [`EventBroadcaster::publish`]
//! delivers to a snapshot of the group taken before any delivery starts, so
//! a subscriber that joins or leaves mid-publish never deadlocks the map or
//! sees half a delivery. A subscriber that errors or panics is logged and
//! skipped; one that reports [`DeliveryError::Closed`] is dropped from the group.
//!
//! Alongside the subscriber table the broadcaster folds every published
//! event into a [`StatusSnapshot`] so a late joiner can ask for the current
//! state instead of waiting for the next transition.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use wsm_protocol::{EventEnvelope, SessionEvent, SessionState, StatusSnapshot};

/// Why a single delivery did not go through.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
	/// The subscriber is gone for good and should be removed.
	#[error("subscriber closed")]
	Closed,
	/// This delivery failed; later ones may succeed.
	#[error("delivery failed: {0}")]
	Failed(String),
}

/// Receives events for the sessions it subscribed to.
///
/// `deliver` is called synchronously from the publisher and must not block.
pub trait Subscriber: Send + Sync {
	fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError>;
}

impl Subscriber for mpsc::UnboundedSender<EventEnvelope> {
	fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError> {
		self.send(envelope.clone()).map_err(|_| DeliveryError::Closed)
	}
}

/// Adapts a closure into a [`Subscriber`].
pub struct FnSubscriber<F>(pub F);

impl<F> Subscriber for FnSubscriber<F>
where
	F: Fn(&EventEnvelope) -> Result<(), DeliveryError> + Send + Sync,
{
	fn deliver(&self, envelope: &EventEnvelope) -> Result<(), DeliveryError> {
		(self.0)(envelope)
	}
}

/// Returned by [`EventBroadcaster::subscribe`]; pass it to
/// [`EventBroadcaster::unsubscribe`] to leave the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
	id: u64,
	session_id: String,
}

impl SubscriptionHandle {
	pub fn session_id(&self) -> &str {
		&self.session_id
	}
}

type Group = Vec<(u64, Arc<dyn Subscriber>)>;

struct Inner {
	subscribers: DashMap<String, Group>,
	statuses: DashMap<String, StatusSnapshot>,
	next_id: AtomicU64,
}

/// Shared, cheaply cloneable event fan-out.
#[derive(Clone)]
pub struct EventBroadcaster {
	inner: Arc<Inner>,
}

impl Default for EventBroadcaster {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for EventBroadcaster {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBroadcaster")
			.field("groups", &self.inner.subscribers.len())
			.field("statuses", &self.inner.statuses.len())
			.finish()
	}
}

impl EventBroadcaster {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				subscribers: DashMap::new(),
				statuses: DashMap::new(),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	/// Registers `subscriber` for every future event of `session_id`.
	///
	/// The session does not have to exist yet.
	pub fn subscribe(&self, session_id: &str, subscriber: Arc<dyn Subscriber>) -> SubscriptionHandle {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner
			.subscribers
			.entry(session_id.to_string())
			.or_default()
			.push((id, subscriber));
		debug!(target: "wsm.broadcast", session = %session_id, subscription = id, "subscribed");
		SubscriptionHandle {
			id,
			session_id: session_id.to_string(),
		}
	}

	/// Removes the subscription. Unknown or already removed handles are ignored.
	pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
		let now_empty = match self.inner.subscribers.get_mut(&handle.session_id) {
			Some(mut group) => {
				group.retain(|(id, _)| *id != handle.id);
				group.is_empty()
			}
			None => return,
		};
		if now_empty {
			self.inner.subscribers.remove_if(&handle.session_id, |_, group| group.is_empty());
		}
		debug!(target: "wsm.broadcast", session = %handle.session_id, subscription = handle.id, "unsubscribed");
	}

	/// Folds `event` into the session's status and delivers it to every
	/// current subscriber. Returns how many deliveries succeeded.
	pub fn publish(&self, session_id: &str, event: SessionEvent) -> usize {
		let envelope = EventEnvelope::new(session_id, event);
		self.apply_status(&envelope);

		let targets: Group = match self.inner.subscribers.get(session_id) {
			Some(group) => group.value().clone(),
			None => return 0,
		};

		let mut delivered = 0;
		let mut closed = Vec::new();
		for (id, subscriber) in &targets {
			let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.deliver(&envelope)))
				.unwrap_or_else(|payload| Err(DeliveryError::Failed(panic_message(payload.as_ref()))));
			match outcome {
				Ok(()) => delivered += 1,
				Err(DeliveryError::Closed) => closed.push(*id),
				Err(DeliveryError::Failed(reason)) => {
					warn!(
						target: "wsm.broadcast",
						session = %session_id,
						subscription = id,
						event = envelope.event.kind(),
						error = %reason,
						"subscriber delivery failed"
					);
				}
			}
		}

		if !closed.is_empty() {
			if let Some(mut group) = self.inner.subscribers.get_mut(session_id) {
				group.retain(|(id, _)| !closed.contains(id));
			}
			self.inner.subscribers.remove_if(session_id, |_, group| group.is_empty());
			debug!(target: "wsm.broadcast", session = %session_id, pruned = closed.len(), "pruned closed subscribers");
		}

		trace!(target: "wsm.broadcast", session = %session_id, event = envelope.event.kind(), delivered, "published");
		delivered
	}

	/// Last known status of the session, if anything was ever recorded for it.
	pub fn current_status(&self, session_id: &str) -> Option<StatusSnapshot> {
		self.inner.statuses.get(session_id).map(|s| s.value().clone())
	}

	/// Overwrites the recorded status with a fresh snapshot in `state`.
	///
	/// Used when a session is (re)created without an event to go with it.
	pub fn reset_status(&self, session_id: &str, state: SessionState) {
		self.inner
			.statuses
			.insert(session_id.to_string(), StatusSnapshot::new(session_id, state));
	}

	/// Forgets the recorded status while it still shows the session as
	/// destroyed. A session re-created under the same id keeps its status.
	pub fn clear_destroyed_status(&self, session_id: &str) -> bool {
		self.inner
			.statuses
			.remove_if(session_id, |_, status| status.state.is_destroyed())
			.is_some()
	}

	pub fn subscriber_count(&self, session_id: &str) -> usize {
		self.inner.subscribers.get(session_id).map(|g| g.len()).unwrap_or(0)
	}

	fn apply_status(&self, envelope: &EventEnvelope) {
		let mut status = self
			.inner
			.statuses
			.entry(envelope.session_id.clone())
			.or_insert_with(|| StatusSnapshot::new(&envelope.session_id, SessionState::Created));
		status.updated_at_ms = envelope.timestamp_ms;

		match &envelope.event {
			SessionEvent::PairingChallenge { payload } => {
				status.state = SessionState::AwaitingPairing;
				status.pending_pairing = Some(payload.clone());
			}
			SessionEvent::StateChanged { to, cause, identity, .. } => {
				status.state = *to;
				if *to != SessionState::AwaitingPairing {
					status.pending_pairing = None;
				}
				match to {
					SessionState::Connected => {
						status.connected_identity = identity.clone();
						status.last_cause = None;
					}
					SessionState::Disconnected | SessionState::Destroyed => {
						status.connected_identity = None;
						if cause.is_some() {
							status.last_cause = *cause;
						}
					}
					_ => {}
				}
			}
			SessionEvent::InboundMessage { .. } => {}
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	let detail = payload
		.downcast_ref::<&str>()
		.map(|s| s.to_string())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "non-string payload".to_string());
	format!("subscriber panicked: {detail}")
}
