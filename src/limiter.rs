//! Request admission control: token buckets, sliding windows, and the per-client service.

pub mod bucket;
pub mod client;
pub mod service;
pub mod window;

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	config::{Algorithm, EndpointLimit},
	limiter::{
		bucket::{BucketStatus, TokenBucket},
		window::{SlidingWindow, WindowStatus},
	},
};

/// Which limiter produced an admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
	/// No limiter blocked the request.
	None,
	/// The process-wide ceiling.
	Global,
	/// The per-(client, endpoint) limiter.
	Endpoint,
}
impl LimitScope {
	/// Stable label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Global => "global",
			Self::Endpoint => "endpoint",
		}
	}
}

/// Concrete limiter instance for one (client, endpoint) pair.
#[derive(Clone, Debug)]
pub enum Limiter {
	/// Burst-friendly bucket.
	TokenBucket(TokenBucket),
	/// Exact trailing-window counter.
	SlidingWindow(SlidingWindow),
}
impl Limiter {
	/// Build the limiter described by `limit`, with its clock starting at `now`.
	pub fn from_limit(limit: &EndpointLimit, now: Instant) -> Self {
		match limit.algorithm {
			Algorithm::TokenBucket => Self::TokenBucket(TokenBucket::with_instant(
				limit.max_requests,
				limit.refill_per_second(),
				now,
			)),
			Algorithm::SlidingWindow =>
				Self::SlidingWindow(SlidingWindow::new(limit.max_requests, limit.window)),
		}
	}

	/// Try to admit one request at `now`.
	pub fn check(&mut self, now: Instant) -> bool {
		match self {
			Self::TokenBucket(bucket) => bucket.consume_at(1, now),
			Self::SlidingWindow(window) => window.is_allowed_at(now),
		}
	}

	/// Time until the next request could be admitted.
	pub fn retry_after(&self, now: Instant) -> Option<Duration> {
		match self {
			Self::TokenBucket(bucket) => bucket.retry_after(1, now),
			Self::SlidingWindow(window) => Some(window.retry_after(now)),
		}
	}

	/// Status projection for diagnostics.
	pub fn status(&self, now: Instant) -> LimiterStatus {
		match self {
			Self::TokenBucket(bucket) => LimiterStatus::TokenBucket(bucket.status(now)),
			Self::SlidingWindow(window) => LimiterStatus::SlidingWindow(window.status(now)),
		}
	}
}

/// Limiter state reported alongside admission decisions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterStatus {
	/// Token bucket status.
	TokenBucket(BucketStatus),
	/// Sliding window status.
	SlidingWindow(WindowStatus),
}
