//! Retry policies and the executor wrapping unreliable downstream calls.

// std
use std::{cell::RefCell, collections::BTreeSet, fmt::Display, future::Future};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time;
// self
use crate::{
	_prelude::*,
	error::{Classify, ErrorKind},
	metrics,
};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

const DEFAULT_OPERATION: &str = "operation";

/// Retry configuration for a class of downstream operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts, including the first call.
	pub max_attempts: u32,
	/// Delay before the second attempt, before jitter.
	pub base_delay: Duration,
	/// Upper bound for a single backoff delay.
	pub max_delay: Duration,
	/// Growth factor applied per attempt.
	pub exponential_base: f64,
	/// Scale each delay by a uniform factor in `[0.5, 1.0]`.
	pub jitter: bool,
	/// Error kinds returned immediately without further attempts.
	pub immediate_failure_kinds: BTreeSet<ErrorKind>,
}
impl RetryPolicy {
	/// Writes against the primary store: three attempts, 1 s base, 10 s cap.
	pub fn database_write() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
			..Self::default()
		}
	}

	/// Reads against the primary store: two attempts, 0.5 s base, 5 s cap.
	pub fn database_read() -> Self {
		Self {
			max_attempts: 2,
			base_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(5),
			..Self::default()
		}
	}

	/// Calls to external APIs: two attempts, 0.5 s base, 3 s cap.
	pub fn api_request() -> Self {
		Self {
			max_attempts: 2,
			base_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(3),
			..Self::default()
		}
	}

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "retry_policy.max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.max_delay < self.base_delay {
			return Err(Error::Validation {
				field: "retry_policy.max_delay",
				reason: "Must be greater than or equal to base_delay.".into(),
			});
		}
		if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
			return Err(Error::Validation {
				field: "retry_policy.exponential_base",
				reason: "Must be a finite number of at least 1.0.".into(),
			});
		}

		Ok(())
	}

	/// Whether errors of `kind` bypass further attempts.
	pub fn fails_immediately(&self, kind: ErrorKind) -> bool {
		self.immediate_failure_kinds.contains(&kind)
	}

	/// Backoff after the zero-based failed `attempt`.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let bounded = self.bounded_backoff(attempt);

		if self.jitter { bounded.mul_f64(random_factor()) } else { bounded }
	}

	fn bounded_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32) as i32;
		let factor = self.exponential_base.max(1.0).powi(exponent);
		let raw = self.base_delay.as_secs_f64() * factor;

		if !raw.is_finite() || raw >= self.max_delay.as_secs_f64() {
			self.max_delay
		} else {
			Duration::from_secs_f64(raw)
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 2,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(5),
			exponential_base: 2.0,
			jitter: true,
			immediate_failure_kinds: BTreeSet::from([ErrorKind::Input]),
		}
	}
}

/// Runs an operation under a [`RetryPolicy`], optionally substituting a fallback on exhaustion.
#[derive(Debug)]
pub struct RetryExecutor<'a, T> {
	policy: &'a RetryPolicy,
	operation: &'a str,
	fallback: Option<T>,
}
impl<'a, T> RetryExecutor<'a, T> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, operation: DEFAULT_OPERATION, fallback: None }
	}

	/// Label attached to logs and metrics.
	pub fn named(mut self, operation: &'a str) -> Self {
		self.operation = operation;

		self
	}

	/// Value returned instead of the last error once every attempt has failed.
	pub fn with_fallback(mut self, fallback: T) -> Self {
		self.fallback = Some(fallback);

		self
	}

	/// Call `operation` until it succeeds, fails immediately, or runs out of attempts.
	///
	/// Errors whose kind is listed in the policy's immediate-failure set are returned as is and
	/// never replaced by the fallback.
	pub async fn execute<E, F, Fut>(self, mut operation: F) -> std::result::Result<T, E>
	where
		E: Classify + Display,
		F: FnMut() -> Fut,
		Fut: Future<Output = std::result::Result<T, E>>,
	{
		let max_attempts = self.policy.max_attempts.max(1);
		let mut attempt = 0;
		let last_err = loop {
			attempt += 1;

			metrics::record_retry_attempt(self.operation);

			let err = match operation().await {
				Ok(value) => {
					if attempt > 1 {
						tracing::info!(operation = self.operation, attempt, "operation recovered");
					}

					return Ok(value);
				},
				Err(err) => err,
			};
			let kind = err.kind();

			if self.policy.fails_immediately(kind) {
				tracing::debug!(
					operation = self.operation,
					attempt,
					?kind,
					error = %err,
					"non-retryable failure"
				);

				return Err(err);
			}
			if attempt >= max_attempts {
				break err;
			}

			let delay = self.policy.compute_backoff(attempt - 1);

			match kind {
				ErrorKind::Fatal => tracing::error!(
					operation = self.operation,
					attempt,
					?delay,
					error = %err,
					"operation failed; retrying"
				),
				_ => tracing::warn!(
					operation = self.operation,
					attempt,
					?delay,
					error = %err,
					"operation failed; retrying"
				),
			}

			if !delay.is_zero() {
				time::sleep(delay).await;
			}
		};

		tracing::error!(
			operation = self.operation,
			attempts = attempt,
			error = %last_err,
			"retry attempts exhausted"
		);

		match self.fallback {
			Some(fallback) => {
				metrics::record_retry_fallback(self.operation);

				tracing::warn!(operation = self.operation, "returning fallback value");

				Ok(fallback)
			},
			None => Err(last_err),
		}
	}
}

fn random_factor() -> f64 {
	SMALL_RNG.with(|cell| cell.borrow_mut().random_range(0.5..=1.0))
}
