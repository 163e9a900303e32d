//! Session id validation and generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Longest accepted caller-supplied id.
pub const MAX_SESSION_ID_LEN: usize = 64;

const GENERATED_PREFIX: &str = "session_";

static LAST_GENERATED_MS: AtomicU64 = AtomicU64::new(0);

/// Checks that a caller-supplied id can double as a directory name.
pub fn validate_session_id(id: &str) -> Result<()> {
	let invalid = |reason| Error::InvalidSessionId {
		id: id.to_string(),
		reason,
	};

	if id.is_empty() {
		return Err(invalid("must not be empty"));
	}
	if id.len() > MAX_SESSION_ID_LEN {
		return Err(invalid("must be at most 64 characters"));
	}
	if id == "." || id == ".." {
		return Err(invalid("must not be a relative path component"));
	}
	if !id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
		return Err(invalid("may only contain ASCII letters, digits, '_', '-' and '.'"));
	}
	Ok(())
}

/// Generates `session_<unix-millis>`, unique within the process.
///
/// Two calls within the same millisecond get consecutive values; the
/// counter never goes backwards even if the wall clock does.
pub fn generate_session_id() -> String {
	let now = wsm_protocol::now_ms();
	let mut last = LAST_GENERATED_MS.load(Ordering::Relaxed);
	loop {
		let next = now.max(last + 1);
		match LAST_GENERATED_MS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
			Ok(_) => return format!("{GENERATED_PREFIX}{next}"),
			Err(actual) => last = actual,
		}
	}
}
