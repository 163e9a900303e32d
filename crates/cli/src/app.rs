//! Builds the session manager and its collaborators from an [`AppConfig`].

use std::sync::Arc;

use tracing::{info, warn};
use wsm::testing::MockController;
use wsm::{ClientFactory, Hooks, KeywordAutoReply, SessionManager, TextNotice};
use wsm_runtime::{GatewayClientFactory, GitHubMirror, WebhookRouter};

use crate::config::AppConfig;
use crate::error::Result;

pub struct App {
	pub manager: Arc<SessionManager>,
	/// Present for the gateway backend, which delivers events as webhooks.
	pub webhooks: Option<WebhookRouter>,
}

pub fn build(config: &AppConfig) -> Result<App> {
	let (factory, webhooks): (Arc<dyn ClientFactory>, Option<WebhookRouter>) =
		match config.backend.gateway_config() {
			Some(gateway) => {
				if gateway.webhook_base_url.is_none() {
					warn!(
						target: "wsm.gateway",
						"backend.webhook_base_url is not set; the gateway must be configured to post webhooks to /webhook/<session>"
					);
				}
				info!(target: "wsm.gateway", api_url = %gateway.api_url, "using gateway backend");
				let router = WebhookRouter::new();
				let factory = GatewayClientFactory::new(gateway, router.clone())?;
				(Arc::new(factory), Some(router))
			}
			None => {
				warn!(target: "wsm.session", "using mock backend; sessions never reach WhatsApp");
				(MockController::new().factory(), None)
			}
		};

	let mut hooks = Hooks::default();
	if !config.auto_reply.is_empty() {
		info!(target: "wsm.session", rules = config.auto_reply.len(), "keyword auto-reply enabled");
		hooks = hooks.with_auto_reply(Arc::new(KeywordAutoReply::new(config.auto_reply.clone())));
	}
	if let Some(text) = &config.connected_notice {
		hooks = hooks.with_connected_notice(Arc::new(TextNotice::new(text.clone())));
	}
	if let Some(mirror) = &config.mirror {
		info!(target: "wsm.mirror", owner = %mirror.owner, repo = %mirror.repo, "credential mirror enabled");
		hooks = hooks.with_mirror(Arc::new(GitHubMirror::new(mirror.github_config())?));
	}

	Ok(App {
		manager: SessionManager::new(config.manager_config(), factory, hooks),
		webhooks,
	})
}
