//! wsm runtime adapters
//!
//! Concrete implementations of the capability traits defined in `wsm`:
//!
//! - **Gateway client**: [`GatewayClient`] drives one instance on an
//!   Evolution-API style WhatsApp HTTP gateway
//! - **Webhooks**: [`WebhookRouter`] normalizes gateway webhooks into client
//!   events and routes them to the connected client
//! - **Credential mirror**: [`GitHubMirror`] uploads a session's credential
//!   directory through the GitHub contents API
//!
//! # Wiring
//!
//! ```text
//!  gateway ──webhook──▶ WebhookRouter ──ClientEvent──▶ SessionHandle
//!     ▲                                                    │
//!     └──────── REST (create/connect/send/delete) ◀── GatewayClient
//! ```

pub mod error;
pub mod gateway;
pub mod github;
pub mod webhook;

pub use error::{Error, Result};
pub use gateway::{GatewayApi, GatewayClient, GatewayClientFactory, GatewayConfig};
pub use github::{GitHubMirror, GitHubMirrorConfig, bundle_directory};
pub use webhook::{DispatchOutcome, WebhookRouter, cause_from_status, extract_qr, parse_webhook};
