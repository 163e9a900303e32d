//! Pluggable side effects around the relay: auto-replies to inbound text,
//! a notice to the account's own chat after pairing, and mirroring
//! credentials to a remote store after pairing.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wsm_protocol::AccountIdentity;

/// Produces an optional reply to an inbound text message.
#[async_trait]
pub trait AutoReply: Send + Sync {
	async fn reply(&self, session_id: &str, sender_id: &str, text: &str) -> Option<String>;
}

/// Never replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutoReply;

#[async_trait]
impl AutoReply for NoAutoReply {
	async fn reply(&self, _session_id: &str, _sender_id: &str, _text: &str) -> Option<String> {
		None
	}
}

/// `keyword -> reply` rule for [`KeywordAutoReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
	pub keyword: String,
	pub reply: String,
}

/// Replies when the whole message (trimmed, case-insensitive) equals a keyword.
///
/// The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct KeywordAutoReply {
	rules: Vec<KeywordRule>,
}

impl KeywordAutoReply {
	pub fn new(rules: Vec<KeywordRule>) -> Self {
		Self { rules }
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	fn matching(&self, text: &str) -> Option<&KeywordRule> {
		let text = text.trim();
		self.rules.iter().find(|rule| rule.keyword.trim().eq_ignore_ascii_case(text))
	}
}

#[async_trait]
impl AutoReply for KeywordAutoReply {
	async fn reply(&self, _session_id: &str, _sender_id: &str, text: &str) -> Option<String> {
		self.matching(text).map(|rule| rule.reply.clone())
	}
}

/// Text sent to the paired account's own chat once a fresh pairing
/// completes. Resuming from stored credentials does not trigger it.
#[async_trait]
pub trait ConnectedNotice: Send + Sync {
	async fn notice(&self, session_id: &str, account: &AccountIdentity) -> Option<String>;
}

/// Sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConnectedNotice;

#[async_trait]
impl ConnectedNotice for NoConnectedNotice {
	async fn notice(&self, _session_id: &str, _account: &AccountIdentity) -> Option<String> {
		None
	}
}

/// Same text for every session. `{session}` is replaced with the session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNotice {
	template: String,
}

impl TextNotice {
	pub fn new(template: impl Into<String>) -> Self {
		Self {
			template: template.into(),
		}
	}
}

#[async_trait]
impl ConnectedNotice for TextNotice {
	async fn notice(&self, session_id: &str, _account: &AccountIdentity) -> Option<String> {
		let text = self.template.replace("{session}", session_id);
		if text.trim().is_empty() { None } else { Some(text) }
	}
}

/// Failure from a [`CredentialMirror`]. Logged by the caller, never fatal.
#[derive(Debug, Error)]
pub enum MirrorError {
	#[error("reading credentials failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("credential mirror is not configured: {0}")]
	NotConfigured(String),
	#[error("upload failed: {0}")]
	Upload(String),
}

/// Uploads a session's credential directory to a remote store.
#[async_trait]
pub trait CredentialMirror: Send + Sync {
	async fn mirror(&self, session_id: &str, storage: &Path) -> Result<(), MirrorError>;
}

/// Mirrors nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMirror;

#[async_trait]
impl CredentialMirror for NoMirror {
	async fn mirror(&self, _session_id: &str, _storage: &Path) -> Result<(), MirrorError> {
		Ok(())
	}
}

/// Hooks handed to every session.
#[derive(Clone)]
pub struct Hooks {
	pub auto_reply: Arc<dyn AutoReply>,
	pub connected_notice: Arc<dyn ConnectedNotice>,
	pub mirror: Arc<dyn CredentialMirror>,
}

impl Default for Hooks {
	fn default() -> Self {
		Self {
			auto_reply: Arc::new(NoAutoReply),
			connected_notice: Arc::new(NoConnectedNotice),
			mirror: Arc::new(NoMirror),
		}
	}
}

impl Hooks {
	pub fn with_auto_reply(mut self, auto_reply: Arc<dyn AutoReply>) -> Self {
		self.auto_reply = auto_reply;
		self
	}

	pub fn with_connected_notice(mut self, notice: Arc<dyn ConnectedNotice>) -> Self {
		self.connected_notice = notice;
		self
	}

	pub fn with_mirror(mut self, mirror: Arc<dyn CredentialMirror>) -> Self {
		self.mirror = mirror;
		self
	}
}

impl std::fmt::Debug for Hooks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Hooks").finish_non_exhaustive()
	}
}
