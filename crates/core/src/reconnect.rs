//! Decides whether a dropped session should be re-initialized.

use std::time::Duration;

use wsm_protocol::DisconnectCause;

/// What to do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
	pub retry: bool,
	/// Wait before re-initializing. Zero when `retry` is false.
	pub delay: Duration,
}

impl ReconnectDecision {
	pub const GIVE_UP: Self = Self {
		retry: false,
		delay: Duration::ZERO,
	};

	pub fn after(delay: Duration) -> Self {
		Self { retry: true, delay }
	}
}

/// Backoff policy for re-initializing sessions.
///
/// The default is a fixed five second delay with unlimited attempts.
/// `multiplier > 1.0` turns it into exponential backoff capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
	pub base_delay: Duration,
	pub multiplier: f64,
	pub max_delay: Duration,
	/// Retries allowed since the session was last connected. `None` retries forever.
	pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self::fixed(Duration::from_secs(5))
	}
}

impl ReconnectPolicy {
	/// Constant delay, unlimited attempts.
	pub fn fixed(delay: Duration) -> Self {
		Self {
			base_delay: delay,
			multiplier: 1.0,
			max_delay: delay,
			max_attempts: None,
		}
	}

	pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
		Self {
			base_delay,
			multiplier,
			max_delay,
			max_attempts: None,
		}
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = Some(max_attempts);
		self
	}

	/// Decides for the `attempt`-th consecutive retry (zero-based).
	///
	/// `LoggedOut` and `Replaced` never retry: the stored credentials are
	/// no longer accepted.
	pub fn decide(&self, cause: DisconnectCause, attempt: u32) -> ReconnectDecision {
		if cause.is_terminal() {
			return ReconnectDecision::GIVE_UP;
		}
		if self.max_attempts.is_some_and(|max| attempt >= max) {
			return ReconnectDecision::GIVE_UP;
		}
		ReconnectDecision::after(self.delay_for(attempt))
	}

	fn delay_for(&self, attempt: u32) -> Duration {
		let base = self.base_delay.as_secs_f64();
		let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
		let secs = (base * factor).min(self.max_delay.as_secs_f64().max(base));
		if secs.is_finite() {
			Duration::from_secs_f64(secs)
		} else {
			self.max_delay
		}
	}
}
