//! Credential mirror backed by the GitHub contents API.
//!
//! Every file of a session's credential directory is bundled into one JSON
//! document (`{"relative/path": "<base64>"}`) and written to
//! `<path_prefix>/<session_id>.json` in the configured repository. Existing
//! files are overwritten by passing their blob `sha`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use wsm::{CredentialMirror, MirrorError};

use crate::error::{Error, Result};

const SERVICE: &str = "github";
const USER_AGENT: &str = concat!("wsm/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GitHubMirrorConfig {
	pub owner: String,
	pub repo: String,
	pub branch: String,
	/// Directory inside the repository, e.g. `sessions`.
	pub path_prefix: String,
	/// Environment variable holding the access token.
	pub token_env: String,
	pub commit_message: String,
	/// Overridable for GitHub Enterprise and tests.
	pub api_base: String,
}

impl GitHubMirrorConfig {
	pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self {
			owner: owner.into(),
			repo: repo.into(),
			branch: "main".to_string(),
			path_prefix: "sessions".to_string(),
			token_env: "GITHUB_TOKEN".to_string(),
			commit_message: "Update session credentials".to_string(),
			api_base: "https://api.github.com".to_string(),
		}
	}
}

#[derive(Deserialize)]
struct ContentInfo {
	sha: String,
}

/// Uploads credential bundles to a GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubMirror {
	http: reqwest::Client,
	config: GitHubMirrorConfig,
}

impl GitHubMirror {
	pub fn new(config: GitHubMirrorConfig) -> Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent(USER_AGENT)
			.timeout(Duration::from_secs(30))
			.build()?;
		Ok(Self { http, config })
	}

	/// Repository path the bundle for `session_id` is written to.
	pub fn remote_path(&self, session_id: &str) -> String {
		let prefix = self.config.path_prefix.trim_matches('/');
		if prefix.is_empty() {
			format!("{session_id}.json")
		} else {
			format!("{prefix}/{session_id}.json")
		}
	}

	fn contents_url(&self, path: &str) -> String {
		format!(
			"{}/repos/{}/{}/contents/{path}",
			self.config.api_base.trim_end_matches('/'),
			self.config.owner,
			self.config.repo
		)
	}

	fn token(&self) -> Result<String> {
		std::env::var(&self.config.token_env)
			.ok()
			.filter(|t| !t.is_empty())
			.ok_or_else(|| Error::MissingToken(self.config.token_env.clone()))
	}

	async fn existing_sha(&self, path: &str, token: &str) -> Result<Option<String>> {
		let response = self
			.http
			.get(self.contents_url(path))
			.query(&[("ref", self.config.branch.as_str())])
			.bearer_auth(token)
			.header("Accept", "application/vnd.github+json")
			.send()
			.await?;
		let status = response.status();
		if status == reqwest::StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(Error::status(SERVICE, status, body));
		}
		let info: ContentInfo = response.json().await?;
		Ok(Some(info.sha))
	}

	/// Creates or overwrites the bundle for one session.
	pub async fn upload(&self, session_id: &str, storage: &Path, token: &str) -> Result<()> {
		let bundle = bundle_directory(storage)?;
		let path = self.remote_path(session_id);
		let sha = self.existing_sha(&path, token).await?;

		let mut body = json!({
			"message": self.config.commit_message,
			"content": STANDARD.encode(serde_json::to_vec(&bundle)?),
			"branch": self.config.branch,
		});
		if let Some(sha) = sha {
			body["sha"] = json!(sha);
		}

		let response = self
			.http
			.put(self.contents_url(&path))
			.bearer_auth(token)
			.header("Accept", "application/vnd.github+json")
			.json(&body)
			.send()
			.await?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(Error::status(SERVICE, status, body));
		}
		info!(target: "wsm.mirror", session = %session_id, path = %path, files = bundle.len(), "credentials uploaded");
		Ok(())
	}
}

#[async_trait]
impl CredentialMirror for GitHubMirror {
	async fn mirror(&self, session_id: &str, storage: &Path) -> std::result::Result<(), MirrorError> {
		let token = self.token()?;
		self.upload(session_id, storage, &token).await.map_err(MirrorError::from)
	}
}

/// Reads every file under `dir` into `{relative_path: base64}`, with `/`
/// separators and sorted keys.
pub fn bundle_directory(dir: &Path) -> Result<BTreeMap<String, String>> {
	let mut bundle = BTreeMap::new();
	let mut pending = vec![dir.to_path_buf()];
	while let Some(current) = pending.pop() {
		for entry in std::fs::read_dir(&current)? {
			let entry = entry?;
			let path = entry.path();
			if entry.file_type()?.is_dir() {
				pending.push(path);
				continue;
			}
			let Ok(relative) = path.strip_prefix(dir) else {
				continue;
			};
			let key = relative
				.components()
				.map(|c| c.as_os_str().to_string_lossy())
				.collect::<Vec<_>>()
				.join("/");
			bundle.insert(key, STANDARD.encode(std::fs::read(&path)?));
		}
	}
	debug!(target: "wsm.mirror", dir = %dir.display(), files = bundle.len(), "bundled credential directory");
	Ok(bundle)
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn bundle_includes_nested_files() {
		let temp = TempDir::new().unwrap();
		std::fs::write(temp.path().join("creds.json"), b"{\"me\":1}").unwrap();
		std::fs::create_dir(temp.path().join("keys")).unwrap();
		std::fs::write(temp.path().join("keys").join("pre-key-1.json"), b"k").unwrap();

		let bundle = bundle_directory(temp.path()).unwrap();
		assert_eq!(bundle.keys().collect::<Vec<_>>(), vec!["creds.json", "keys/pre-key-1.json"]);
		assert_eq!(STANDARD.decode(&bundle["keys/pre-key-1.json"]).unwrap(), b"k");
	}

	#[test]
	fn remote_path_joins_prefix() {
		let mut config = GitHubMirrorConfig::new("me", "sessions-repo");
		let mirror = GitHubMirror::new(config.clone()).unwrap();
		assert_eq!(mirror.remote_path("s1"), "sessions/s1.json");

		config.path_prefix = "/".into();
		let mirror = GitHubMirror::new(config).unwrap();
		assert_eq!(mirror.remote_path("s1"), "s1.json");
	}

	#[tokio::test]
	async fn missing_token_is_not_configured() {
		let mut config = GitHubMirrorConfig::new("me", "repo");
		config.token_env = "WSM_TEST_TOKEN_THAT_IS_NEVER_SET".into();
		let mirror = GitHubMirror::new(config).unwrap();

		let err = mirror.mirror("s1", Path::new("/nonexistent")).await.unwrap_err();
		assert!(matches!(err, MirrorError::NotConfigured(_)));
	}
}
