//! Application configuration.
//!
//! Resolution order, lowest to highest priority: built-in defaults, the
//! JSON config file, `WSM_*` environment variables, command line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use wsm::{KeywordRule, ManagerConfig, ReconnectPolicy};
use wsm_runtime::{GatewayConfig, GitHubMirrorConfig};

use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

pub const ENV_HOST: &str = "WSM_HOST";
pub const ENV_PORT: &str = "WSM_PORT";
pub const ENV_SESSIONS_DIR: &str = "WSM_SESSIONS_DIR";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub server: ServerConfig,
	pub sessions_dir: PathBuf,
	pub restore_on_start: bool,
	pub reconnect: ReconnectConfig,
	pub timeouts: TimeoutConfig,
	pub backend: BackendConfig,
	pub mirror: Option<MirrorConfig>,
	pub auto_reply: Vec<KeywordRule>,
	/// Sent to the account's own chat after a fresh pairing. `{session}`
	/// expands to the session id.
	pub connected_notice: Option<String>,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			server: ServerConfig::default(),
			sessions_dir: default_sessions_dir(),
			restore_on_start: true,
			reconnect: ReconnectConfig::default(),
			timeouts: TimeoutConfig::default(),
			backend: BackendConfig::default(),
			mirror: None,
			auto_reply: Vec::new(),
			connected_notice: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 3000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub base_delay_ms: u64,
	pub multiplier: f64,
	pub max_delay_ms: u64,
	/// Unlimited when absent.
	pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			base_delay_ms: 5_000,
			multiplier: 1.0,
			max_delay_ms: 60_000,
			max_attempts: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
	pub initialize_ms: u64,
	pub send_ms: u64,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		Self {
			initialize_ms: 60_000,
			send_ms: 30_000,
		}
	}
}

/// Which WhatsApp client implementation backs the sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
	/// In-memory scripted client; never reaches WhatsApp.
	#[default]
	Mock,
	/// Evolution-API style HTTP gateway.
	Gateway {
		api_url: String,
		api_key: String,
		#[serde(default)]
		webhook_base_url: Option<String>,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
	pub owner: String,
	pub repo: String,
	#[serde(default = "default_branch")]
	pub branch: String,
	#[serde(default = "default_path_prefix")]
	pub path_prefix: String,
	#[serde(default = "default_token_env")]
	pub token_env: String,
}

fn default_branch() -> String {
	"main".to_string()
}

fn default_path_prefix() -> String {
	"sessions".to_string()
}

fn default_token_env() -> String {
	"GITHUB_TOKEN".to_string()
}

fn default_sessions_dir() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("wsm")
		.join("sessions")
}

/// `<config dir>/wsm/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("wsm").join("config.json"))
}

impl AppConfig {
	/// Loads the explicit file (which must exist) or the default file (if
	/// present), then applies the process environment.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		let mut config = match explicit {
			Some(path) => Self::from_file(path)?,
			None => match default_config_path() {
				Some(path) if path.exists() => Self::from_file(&path)?,
				_ => Self::default(),
			},
		};
		config.apply_env(|name| std::env::var(name).ok())?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config = serde_json::from_str(&raw).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(target: "wsm.config", path = %path.display(), "loaded config file");
		Ok(config)
	}

	/// Applies `WSM_HOST`, `WSM_PORT` and `WSM_SESSIONS_DIR`. Empty values are ignored.
	pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
		let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

		if let Some(host) = lookup(ENV_HOST) {
			self.server.host = host;
		}
		if let Some(port) = lookup(ENV_PORT) {
			self.server.port = port.trim().parse().map_err(|_| CliError::InvalidEnv {
				name: ENV_PORT,
				value: port.clone(),
			})?;
		}
		if let Some(dir) = lookup(ENV_SESSIONS_DIR) {
			self.sessions_dir = PathBuf::from(dir);
		}
		Ok(())
	}

	pub fn apply_overrides(&mut self, args: &ServeArgs) {
		if let Some(host) = &args.host {
			self.server.host = host.clone();
		}
		if let Some(port) = args.port {
			self.server.port = port;
		}
		if let Some(dir) = &args.sessions_dir {
			self.sessions_dir = dir.clone();
		}
		if args.no_restore {
			self.restore_on_start = false;
		}
	}

	pub fn validate(&self) -> Result<()> {
		let reconnect = &self.reconnect;
		if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
			return Err(CliError::InvalidConfig(format!(
				"reconnect.multiplier must be >= 1.0, got {}",
				reconnect.multiplier
			)));
		}
		if reconnect.max_delay_ms < reconnect.base_delay_ms {
			return Err(CliError::InvalidConfig(
				"reconnect.max_delay_ms must not be below reconnect.base_delay_ms".into(),
			));
		}
		if self.timeouts.initialize_ms == 0 || self.timeouts.send_ms == 0 {
			return Err(CliError::InvalidConfig("timeouts must be greater than zero".into()));
		}
		if let BackendConfig::Gateway { api_url, .. } = &self.backend {
			if api_url.trim().is_empty() {
				return Err(CliError::InvalidConfig("backend.api_url is required".into()));
			}
		}
		Ok(())
	}

	pub fn reconnect_policy(&self) -> ReconnectPolicy {
		let reconnect = &self.reconnect;
		ReconnectPolicy {
			base_delay: Duration::from_millis(reconnect.base_delay_ms),
			multiplier: reconnect.multiplier,
			max_delay: Duration::from_millis(reconnect.max_delay_ms),
			max_attempts: reconnect.max_attempts,
		}
	}

	pub fn manager_config(&self) -> ManagerConfig {
		ManagerConfig::new(&self.sessions_dir)
			.with_reconnect(self.reconnect_policy())
			.with_initialize_timeout(Duration::from_millis(self.timeouts.initialize_ms))
			.with_send_timeout(Duration::from_millis(self.timeouts.send_ms))
	}

	/// Copy safe to print: the gateway API key is masked.
	pub fn redacted(&self) -> Self {
		let mut config = self.clone();
		if let BackendConfig::Gateway { api_key, .. } = &mut config.backend {
			*api_key = REDACTED.to_string();
		}
		config
	}
}

impl BackendConfig {
	pub fn gateway_config(&self) -> Option<GatewayConfig> {
		match self {
			BackendConfig::Mock => None,
			BackendConfig::Gateway {
				api_url,
				api_key,
				webhook_base_url,
			} => {
				let mut config = GatewayConfig::new(api_url.clone(), api_key.clone());
				config.webhook_base_url = webhook_base_url.clone();
				Some(config)
			}
		}
	}
}

impl MirrorConfig {
	pub fn github_config(&self) -> GitHubMirrorConfig {
		let mut config = GitHubMirrorConfig::new(self.owner.clone(), self.repo.clone());
		config.branch = self.branch.clone();
		config.path_prefix = self.path_prefix.clone();
		config.token_env = self.token_env.clone();
		config
	}
}
