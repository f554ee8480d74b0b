//! Crate-wide error types, error classification, and `Result` alias.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, limiter::LimitScope};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the resource guard crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Serde(#[from] serde_json::Error),

	#[error("Internal error: {0}")]
	Internal(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Rate limit exceeded ({scope:?}) for client '{client}'.")]
	RateLimited { scope: LimitScope, client: String, retry_after: Option<Duration> },
	#[error("Operation '{operation}' timed out after {after:?}.")]
	Timeout { operation: String, after: Duration },
	#[error("Upstream failure: {0}")]
	Upstream(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Classify the error for retry and user-facing decisions.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Validation { .. } | Self::Serde(_) => ErrorKind::Input,
			Self::Upstream(_) | Self::Timeout { .. } | Self::RateLimited { .. } =>
				ErrorKind::Transient,
			Self::Internal(_) | Self::Metrics(_) => ErrorKind::Fatal,
		}
	}
}
#[cfg(feature = "prometheus")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}

/// Error categories driving retry and presentation decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Deterministic caller-input error; retrying cannot change the outcome.
	Input,
	/// Non-deterministic downstream failure (network, timeout, unavailable).
	Transient,
	/// Anything uncategorised; retried conservatively and always logged.
	Fatal,
}

/// Errors that can report their [`ErrorKind`].
///
/// Implement this for caller-owned error types to run them through
/// [`RetryExecutor`](crate::retry::RetryExecutor).
pub trait Classify {
	/// Category of this error.
	fn kind(&self) -> ErrorKind;
}
impl Classify for Error {
	fn kind(&self) -> ErrorKind {
		Error::kind(self)
	}
}
