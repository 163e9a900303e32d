//! Gateway webhook normalization and routing.
//!
//! The gateway reports everything that happens on an instance by POSTing a
//! JSON webhook. [`parse_webhook`] turns one payload into raw
//! [`ClientEvent`]s and [`WebhookRouter`] forwards them to the event sink of
//! the [`GatewayClient`](crate::GatewayClient) currently connected for that
//! instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};
use wsm::{ClientEvent, EventSink, RawMessage};
use wsm_protocol::{AccountIdentity, DisconnectCause};

/// What happened to a dispatched webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// This many events were forwarded.
	Delivered(usize),
	/// The payload carried nothing of interest.
	Ignored,
	/// No client is connected for the instance.
	NoSession,
}

#[derive(Clone)]
struct Route {
	token: u64,
	sink: EventSink,
}

/// Maps gateway instance names to the sink of the connected client.
#[derive(Clone, Default)]
pub struct WebhookRouter {
	routes: Arc<DashMap<String, Route>>,
	next_token: Arc<AtomicU64>,
}

impl std::fmt::Debug for WebhookRouter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WebhookRouter").field("routes", &self.routes.len()).finish()
	}
}

impl WebhookRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Routes webhooks for `instance` to `sink`, replacing any earlier route.
	///
	/// The returned token identifies this registration for [`unregister`](Self::unregister).
	pub fn register(&self, instance: &str, sink: EventSink) -> u64 {
		let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
		self.routes.insert(instance.to_string(), Route { token, sink });
		debug!(target: "wsm.webhook", instance = %instance, token, "route registered");
		token
	}

	/// Removes the route if it is still the one registered with `token`.
	pub fn unregister(&self, instance: &str, token: u64) {
		if self.routes.remove_if(instance, |_, route| route.token == token).is_some() {
			debug!(target: "wsm.webhook", instance = %instance, token, "route removed");
		}
	}

	pub fn is_registered(&self, instance: &str) -> bool {
		self.routes.contains_key(instance)
	}

	/// Parses `payload` and forwards the resulting events.
	pub fn dispatch(&self, instance: &str, payload: &Value) -> DispatchOutcome {
		let events = parse_webhook(payload);
		if events.is_empty() {
			trace!(target: "wsm.webhook", instance = %instance, event = %event_name(payload), "webhook ignored");
			return DispatchOutcome::Ignored;
		}

		let Some(route) = self.routes.get(instance).map(|r| r.value().clone()) else {
			debug!(target: "wsm.webhook", instance = %instance, "webhook for unknown instance");
			return DispatchOutcome::NoSession;
		};

		let mut delivered = 0;
		for event in events {
			if route.sink.send(event).is_err() {
				self.unregister(instance, route.token);
				return if delivered == 0 { DispatchOutcome::NoSession } else { DispatchOutcome::Delivered(delivered) };
			}
			delivered += 1;
		}
		DispatchOutcome::Delivered(delivered)
	}
}

/// Event name in dotted lowercase form (`QRCODE_UPDATED` becomes `qrcode.updated`).
pub fn event_name(payload: &Value) -> String {
	payload["event"].as_str().unwrap_or_default().to_ascii_lowercase().replace('_', ".")
}

/// Translates one webhook payload into raw client events.
pub fn parse_webhook(payload: &Value) -> Vec<ClientEvent> {
	let data = &payload["data"];
	match event_name(payload).as_str() {
		"qrcode.updated" => extract_qr(data).map(ClientEvent::Qr).into_iter().collect(),
		"connection.update" => parse_connection(payload).into_iter().collect(),
		"messages.upsert" => {
			let items: Vec<&Value> = match data.as_array() {
				Some(items) => items.iter().collect(),
				None => vec![data],
			};
			items
				.into_iter()
				.filter_map(parse_message)
				.map(ClientEvent::Message)
				.collect()
		}
		"creds.update" => vec![ClientEvent::CredentialsUpdated],
		_ => Vec::new(),
	}
}

/// Pulls a QR payload out of the shapes gateways use for it.
pub fn extract_qr(value: &Value) -> Option<String> {
	value["qrcode"]["base64"]
		.as_str()
		.or_else(|| value["base64"].as_str())
		.or_else(|| value["qrcode"]["code"].as_str())
		.or_else(|| value["qrcode"].as_str())
		.or_else(|| value["code"].as_str())
		.filter(|qr| !qr.is_empty())
		.map(str::to_string)
}

/// Disconnect cause for a gateway close status code.
pub fn cause_from_status(code: Option<u64>) -> DisconnectCause {
	match code {
		Some(401) => DisconnectCause::LoggedOut,
		Some(440) => DisconnectCause::Replaced,
		Some(503 | 515) => DisconnectCause::ServerRestart,
		Some(408 | 428 | 500) => DisconnectCause::NetworkError,
		_ => DisconnectCause::Unknown,
	}
}

fn parse_connection(payload: &Value) -> Option<ClientEvent> {
	let data = &payload["data"];
	match data["state"].as_str()? {
		"open" | "connected" => {
			let id = data["wuid"]
				.as_str()
				.or_else(|| payload["sender"].as_str())
				.unwrap_or_default()
				.to_string();
			let name = data["profileName"]
				.as_str()
				.filter(|name| !name.is_empty())
				.unwrap_or("User")
				.to_string();
			Some(ClientEvent::Ready(AccountIdentity { id, name }))
		}
		"connecting" => Some(ClientEvent::Authenticated),
		"close" | "closed" => Some(ClientEvent::Disconnected(cause_from_status(status_code(data)))),
		_ => None,
	}
}

fn status_code(data: &Value) -> Option<u64> {
	let reason = &data["statusReason"];
	reason.as_u64().or_else(|| reason.as_str().and_then(|s| s.parse().ok()))
}

fn parse_message(item: &Value) -> Option<RawMessage> {
	let key = &item["key"];
	if key["fromMe"].as_bool().unwrap_or(false) {
		return None;
	}
	let remote_jid = key["remoteJid"].as_str()?;
	if remote_jid == "status@broadcast" {
		return None;
	}
	let sender_id = key["participant"]
		.as_str()
		.filter(|p| !p.is_empty())
		.unwrap_or(remote_jid)
		.to_string();

	let message = &item["message"];
	let kind = item["messageType"]
		.as_str()
		.map(str::to_string)
		.or_else(|| {
			message
				.as_object()
				.and_then(|m| m.keys().find(|k| *k != "messageContextInfo").cloned())
		})
		.unwrap_or_default();

	let text = message["conversation"]
		.as_str()
		.or_else(|| message["extendedTextMessage"]["text"].as_str())
		.map(str::to_string);
	let caption = message[kind.as_str()]["caption"].as_str().map(str::to_string);

	let timestamp_ms = item["messageTimestamp"]
		.as_u64()
		.or_else(|| item["messageTimestamp"].as_str().and_then(|s| s.parse().ok()))
		.map(|secs| secs.saturating_mul(1000))
		.unwrap_or_else(wsm_protocol::now_ms);

	Some(RawMessage {
		sender_id,
		sender_name: item["pushName"].as_str().map(str::to_string),
		kind,
		text,
		caption,
		timestamp_ms,
	})
}
