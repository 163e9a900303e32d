//! Reduces library message shapes to [`MessageContent`].

use wsm_protocol::{MessageContent, SessionEvent};

use crate::client::RawMessage;

const TEXT_KINDS: &[&str] = &["conversation", "extendedTextMessage", "chat", "text"];

const MEDIA_KINDS: &[(&str, &str)] = &[
	("imageMessage", "image"),
	("videoMessage", "video"),
	("audioMessage", "audio"),
	("documentMessage", "document"),
	("stickerMessage", "sticker"),
	("image", "image"),
	("video", "video"),
	("audio", "audio"),
	("ptt", "audio"),
	("document", "document"),
	("sticker", "sticker"),
];

/// Classifies the message body. Unrecognized kinds become
/// [`MessageContent::Unknown`] carrying the raw type tag.
pub fn classify(raw: &RawMessage) -> MessageContent {
	if TEXT_KINDS.contains(&raw.kind.as_str()) {
		if let Some(text) = &raw.text {
			return MessageContent::Text { text: text.clone() };
		}
	}
	if let Some((_, media_type)) = MEDIA_KINDS.iter().find(|(kind, _)| *kind == raw.kind) {
		return MessageContent::MediaPlaceholder {
			media_type: (*media_type).to_string(),
			caption: raw.caption.clone().filter(|c| !c.is_empty()),
		};
	}
	let type_tag = if raw.kind.is_empty() { "unknown" } else { raw.kind.as_str() };
	MessageContent::Unknown {
		type_tag: type_tag.to_string(),
	}
}

/// Builds the `InboundMessage` event for a raw message.
///
/// Without a push name the display name falls back to the local part of the
/// sender address.
pub fn inbound_event(raw: &RawMessage) -> SessionEvent {
	let display_name = raw
		.sender_name
		.clone()
		.filter(|name| !name.trim().is_empty())
		.unwrap_or_else(|| raw.sender_id.split('@').next().unwrap_or_default().to_string());

	SessionEvent::InboundMessage {
		sender_id: raw.sender_id.clone(),
		sender_display_name: display_name,
		content: classify(raw),
		timestamp_ms: raw.timestamp_ms,
	}
}
