//! Client for an Evolution-API style WhatsApp HTTP gateway.
//!
//! The gateway runs the actual WhatsApp connection and keeps the device
//! credentials. One gateway *instance* backs one session and is named by the
//! session id. Events come back as webhooks that the
//! [`WebhookRouter`] hands to the connected [`GatewayClient`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use wsm::{ClientError, ClientEvent, ClientFactory, EventSink, WhatsAppClient};

use crate::error::{Error, Result};
use crate::webhook::{WebhookRouter, extract_qr};

const SERVICE: &str = "gateway";

/// File written into a session's storage directory describing its instance.
pub const INSTANCE_FILE: &str = "gateway.json";

/// Connection settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
	/// Base URL, e.g. `http://localhost:8080`.
	pub api_url: String,
	pub api_key: String,
	/// Public base URL of this server; instances post webhooks to
	/// `<webhook_base_url>/webhook/<instance>`.
	pub webhook_base_url: Option<String>,
	pub request_timeout: Duration,
}

impl GatewayConfig {
	pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
		Self {
			api_url: api_url.into(),
			api_key: api_key.into(),
			webhook_base_url: None,
			request_timeout: Duration::from_secs(30),
		}
	}
}

/// Thin wrapper over the gateway's REST endpoints.
#[derive(Debug, Clone)]
pub struct GatewayApi {
	http: reqwest::Client,
	config: GatewayConfig,
}

impl GatewayApi {
	pub fn new(config: GatewayConfig) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(config.request_timeout).build()?;
		Ok(Self { http, config })
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
	}

	fn webhook_url(&self, instance: &str) -> Option<String> {
		self.config
			.webhook_base_url
			.as_deref()
			.map(|base| format!("{}/webhook/{instance}", base.trim_end_matches('/')))
	}

	/// Creates the instance and returns the gateway's response (which
	/// usually carries the first QR code).
	pub async fn create_instance(&self, instance: &str) -> Result<Value> {
		let mut body = json!({
			"instanceName": instance,
			"qrcode": true,
			"integration": "WHATSAPP-BAILEYS",
		});
		if let Some(webhook) = self.webhook_url(instance) {
			body["webhook"] = json!({
				"url": webhook,
				"byEvents": false,
				"events": ["QRCODE_UPDATED", "CONNECTION_UPDATE", "MESSAGES_UPSERT", "CREDS_UPDATE"],
			});
		}

		debug!(target: "wsm.gateway", instance = %instance, "creating instance");
		let response = self
			.http
			.post(self.url("instance/create"))
			.header("apikey", &self.config.api_key)
			.json(&body)
			.send()
			.await?;
		read_json(response).await
	}

	/// Reconnects an existing instance; returns a fresh QR when the
	/// instance is not paired.
	pub async fn connect_instance(&self, instance: &str) -> Result<Value> {
		debug!(target: "wsm.gateway", instance = %instance, "connecting instance");
		let response = self
			.http
			.get(self.url(&format!("instance/connect/{instance}")))
			.header("apikey", &self.config.api_key)
			.send()
			.await?;
		read_json(response).await
	}

	/// Deletes the instance and its credentials. A missing instance is not an error.
	pub async fn delete_instance(&self, instance: &str) -> Result<()> {
		let response = self
			.http
			.delete(self.url(&format!("instance/delete/{instance}")))
			.header("apikey", &self.config.api_key)
			.send()
			.await?;
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(());
		}
		read_json(response).await.map(|_| ())
	}

	pub async fn send_text(&self, instance: &str, number: &str, text: &str) -> Result<()> {
		let response = self
			.http
			.post(self.url(&format!("message/sendText/{instance}")))
			.header("apikey", &self.config.api_key)
			.json(&json!({ "number": number, "text": text }))
			.send()
			.await?;
		read_json(response).await.map(|_| ())
	}
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
	let status = response.status();
	let body = response.text().await?;
	if !status.is_success() {
		return Err(Error::status(SERVICE, status, body));
	}
	if body.trim().is_empty() {
		return Ok(Value::Null);
	}
	Ok(serde_json::from_str(&body)?)
}

/// True for the "name already in use" answer to `instance/create`.
fn is_already_exists(err: &Error) -> bool {
	match err {
		Error::Status { status, body, .. } => {
			let body = body.to_ascii_lowercase();
			matches!(status, 403 | 409) || body.contains("already in use") || body.contains("already exists")
		}
		_ => false,
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceRecord {
	instance: String,
	api_url: String,
}

/// [`WhatsAppClient`] for one gateway instance.
pub struct GatewayClient {
	instance: String,
	storage: PathBuf,
	api: Arc<GatewayApi>,
	router: WebhookRouter,
	route: Mutex<Option<u64>>,
}

impl GatewayClient {
	fn write_record(&self) -> std::io::Result<()> {
		let record = InstanceRecord {
			instance: self.instance.clone(),
			api_url: self.api.config.api_url.clone(),
		};
		std::fs::create_dir_all(&self.storage)?;
		let json = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;
		std::fs::write(self.storage.join(INSTANCE_FILE), json)
	}

	async fn open(&self) -> Result<Value> {
		match self.api.create_instance(&self.instance).await {
			Ok(response) => Ok(response),
			Err(err) if is_already_exists(&err) => {
				debug!(target: "wsm.gateway", instance = %self.instance, "instance exists, reconnecting");
				self.api.connect_instance(&self.instance).await
			}
			Err(err) => Err(err),
		}
	}
}

#[async_trait]
impl WhatsAppClient for GatewayClient {
	async fn connect(&self, events: EventSink) -> std::result::Result<(), ClientError> {
		self.write_record().map_err(|e| ClientError::Transport(e.to_string()))?;

		let token = self.router.register(&self.instance, events.clone());
		*self.route.lock() = Some(token);

		match self.open().await {
			Ok(response) => {
				if let Some(qr) = extract_qr(&response) {
					let _ = events.send(ClientEvent::Qr(qr));
				}
				info!(target: "wsm.gateway", instance = %self.instance, "instance opened");
				Ok(())
			}
			Err(err) => {
				self.router.unregister(&self.instance, token);
				self.route.lock().take();
				Err(err.into())
			}
		}
	}

	async fn disconnect(&self) -> std::result::Result<(), ClientError> {
		if let Some(token) = self.route.lock().take() {
			self.router.unregister(&self.instance, token);
		}
		Ok(())
	}

	async fn send_text(&self, target_id: &str, text: &str) -> std::result::Result<(), ClientError> {
		let number = target_id.split('@').next().unwrap_or(target_id);
		self.api
			.send_text(&self.instance, number, text)
			.await
			.map_err(ClientError::from)
	}

	async fn forget(&self) -> std::result::Result<(), ClientError> {
		match self.api.delete_instance(&self.instance).await {
			Ok(()) => {
				info!(target: "wsm.gateway", instance = %self.instance, "instance deleted");
				Ok(())
			}
			Err(err) => {
				warn!(target: "wsm.gateway", instance = %self.instance, error = %err, "deleting instance failed");
				Err(err.into())
			}
		}
	}
}

/// Opens [`GatewayClient`]s that share one HTTP client and webhook router.
#[derive(Debug, Clone)]
pub struct GatewayClientFactory {
	api: Arc<GatewayApi>,
	router: WebhookRouter,
}

impl GatewayClientFactory {
	pub fn new(config: GatewayConfig, router: WebhookRouter) -> Result<Self> {
		Ok(Self {
			api: Arc::new(GatewayApi::new(config)?),
			router,
		})
	}

	pub fn router(&self) -> &WebhookRouter {
		&self.router
	}
}

impl ClientFactory for GatewayClientFactory {
	fn create(&self, session_id: &str, storage: &Path) -> std::result::Result<Arc<dyn WhatsAppClient>, ClientError> {
		Ok(Arc::new(GatewayClient {
			instance: session_id.to_string(),
			storage: storage.to_path_buf(),
			api: Arc::clone(&self.api),
			router: self.router.clone(),
			route: Mutex::new(None),
		}))
	}
}
