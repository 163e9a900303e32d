//! wsm: session lifecycle and event relay for multi-session WhatsApp automation
//!
//! One process manages many independent WhatsApp sessions. Each session
//! wraps a single client connection, reports pairing challenges, state
//! changes and inbound messages as normalized events, and is reconnected
//! according to a [`ReconnectPolicy`] until it is deleted or the account
//! logs it out.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wsm::{Hooks, ManagerConfig, SessionManager};
//! use wsm::testing::MockController;
//!
//! let controller = MockController::new();
//! let manager = SessionManager::new(
//!     ManagerConfig::new("/tmp/wsm-sessions"),
//!     controller.factory(),
//!     Hooks::default(),
//! );
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! manager.subscribe("s1", Arc::new(tx));
//! manager.create_session(Some("s1"))?;
//!
//! while let Some(envelope) = rx.recv().await {
//!     println!("{}: {:?}", envelope.session_id, envelope.event);
//! }
//! ```
//!
//! # Layout
//!
//! - [`SessionRegistry`]: id-keyed table with create/get/list/remove
//! - [`SessionHandle`]: adapter around one [`WhatsAppClient`]
//! - [`EventBroadcaster`]: per-session pub/sub plus last known status
//! - [`ReconnectPolicy`]: retry decision per disconnect cause
//! - [`SessionManager`]: owns all of the above and supervises each session

pub mod broadcast;
pub mod client;
pub mod error;
pub mod handle;
pub mod hooks;
pub mod id;
pub mod manager;
pub mod message;
pub mod reconnect;
pub mod registry;
pub mod storage;
pub mod testing;

pub use broadcast::{DeliveryError, EventBroadcaster, FnSubscriber, Subscriber, SubscriptionHandle};
pub use client::{ClientError, ClientEvent, ClientFactory, EventSink, EventStream, RawMessage, WhatsAppClient};
pub use error::{Error, Result};
pub use handle::{HandleContext, SessionHandle};
pub use hooks::{
	AutoReply, ConnectedNotice, CredentialMirror, Hooks, KeywordAutoReply, KeywordRule, MirrorError, NoAutoReply,
	NoConnectedNotice, NoMirror, TextNotice,
};
pub use id::{generate_session_id, validate_session_id};
pub use manager::{CreatedSession, ManagerConfig, SessionManager};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use registry::{Session, SessionRegistry};
pub use storage::CredentialStore;
pub use wsm_protocol as protocol;
