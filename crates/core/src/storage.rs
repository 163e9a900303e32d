//! Per-session credential directories.
//!
//! Layout is one directory per session under a shared root:
//!
//! ```text
//! <root>/
//!   s1/            # whatever the client library persists
//!   session_1700000000000/
//! ```
//!
//! The directory name is the session id, which is why ids are validated
//! before they get here.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::id::validate_session_id;

/// Owns the root directory holding every session's credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
	root: PathBuf,
}

impl CredentialStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Directory for one session. Does not touch the filesystem.
	pub fn path_for(&self, session_id: &str) -> PathBuf {
		self.root.join(session_id)
	}

	pub fn exists(&self, session_id: &str) -> bool {
		self.path_for(session_id).is_dir()
	}

	/// Creates the session directory (and the root) if missing.
	pub fn ensure(&self, session_id: &str) -> Result<PathBuf> {
		let path = self.path_for(session_id);
		std::fs::create_dir_all(&path).map_err(|source| Error::Storage {
			path: path.clone(),
			source,
		})?;
		Ok(path)
	}

	/// Deletes the session directory and everything under it.
	///
	/// Removing a directory that does not exist succeeds.
	pub fn remove(&self, session_id: &str) -> Result<()> {
		let path = self.path_for(session_id);
		match std::fs::remove_dir_all(&path) {
			Ok(()) => {
				debug!(target: "wsm.storage", session = %session_id, path = %path.display(), "removed credentials");
				Ok(())
			}
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(source) => Err(Error::Storage { path, source }),
		}
	}

	/// Ids of every session that has a credential directory, sorted.
	///
	/// Entries whose names are not valid session ids are skipped. A missing
	/// root yields an empty list.
	pub fn list_ids(&self) -> Result<Vec<String>> {
		let entries = match std::fs::read_dir(&self.root) {
			Ok(entries) => entries,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(source) => {
				return Err(Error::Storage {
					path: self.root.clone(),
					source,
				});
			}
		};

		let mut ids = Vec::new();
		for entry in entries.flatten() {
			if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
				continue;
			}
			let Some(name) = entry.file_name().to_str().map(str::to_string) else {
				continue;
			};
			if validate_session_id(&name).is_ok() {
				ids.push(name);
			}
		}
		ids.sort();
		Ok(ids)
	}
}
