//! Construction-time configuration and validation.
//!
//! Tunables are read once when the cache store and rate limiter are built; nothing here is
//! re-read at runtime.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*, cache::entry::DEFAULT_STALE_AFTER, cache::refresher::DEFAULT_REFRESH_INTERVAL,
};

/// Default cache TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default cache capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 100;
/// Default window shared by the stock limiter table.
pub const DEFAULT_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// Largest accepted `max_requests` for any limit.
pub const MAX_REQUESTS_PER_WINDOW: u32 = 1_000_000;
/// Longest accepted limit window.
pub const MAX_LIMIT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Endpoint name for dashboard metric reads.
pub const ENDPOINT_METRICS: &str = "/api/metrics";
/// Endpoint name for analysis history reads.
pub const ENDPOINT_HISTORY: &str = "/api/analysis-history";
/// Endpoint name for log submission (expensive downstream AI call).
pub const ENDPOINT_LOG_SUBMISSION: &str = "/analisar_logs";
/// Endpoint name for classification writes.
pub const ENDPOINT_CLASSIFICATION: &str = "/classificar_solucao";

/// Top-level configuration for [`Guard`](crate::Guard).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
	/// Cache sizing and freshness.
	pub cache: CacheConfig,
	/// Admission limits.
	pub rate_limit: RateLimitConfig,
}
impl GuardConfig {
	/// Parse and validate a JSON document; missing sections fall back to defaults.
	pub fn from_json(raw: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(raw)?;

		config.validate()?;

		Ok(config)
	}

	/// Validate every section.
	pub fn validate(&self) -> Result<()> {
		self.cache.validate()?;
		self.rate_limit.validate()
	}
}

/// Cache store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// TTL applied when `set` omits one.
	pub default_ttl: Duration,
	/// Capacity bound.
	pub max_entries: usize,
	/// Age after which entries become eligible for background refresh.
	pub stale_after: Duration,
	/// Period between background refresh cycles.
	pub refresh_interval: Duration,
}
impl CacheConfig {
	/// Short-lived, small cache for local development.
	pub fn development() -> Self {
		Self { default_ttl: Duration::from_secs(60), max_entries: 50, ..Self::default() }
	}

	/// Longer-lived, larger cache for production traffic.
	pub fn production() -> Self {
		Self { default_ttl: Duration::from_secs(600), max_entries: 200, ..Self::default() }
	}

	/// Validate invariants for cache configuration.
	///
	/// `stale_after >= default_ttl` is accepted; such entries simply expire before they are
	/// ever refreshed.
	pub fn validate(&self) -> Result<()> {
		if self.default_ttl.is_zero() {
			return Err(Error::Validation {
				field: "cache.default_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_entries == 0 {
			return Err(Error::Validation {
				field: "cache.max_entries",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.refresh_interval.is_zero() {
			return Err(Error::Validation {
				field: "cache.refresh_interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			default_ttl: DEFAULT_TTL,
			max_entries: DEFAULT_MAX_ENTRIES,
			stale_after: DEFAULT_STALE_AFTER,
			refresh_interval: DEFAULT_REFRESH_INTERVAL,
		}
	}
}

/// Admission algorithm used by an endpoint limiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
	/// Exact count of admissions within a trailing window.
	#[default]
	SlidingWindow,
	/// Burst up to `max_requests`, refilled at `max_requests / window` per second.
	TokenBucket,
}

/// Threshold for a single endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
	/// Requests admitted per window (bucket capacity for token buckets).
	pub max_requests: u32,
	/// Window length (refill period for token buckets).
	pub window: Duration,
	/// Algorithm backing each per-client instance.
	#[serde(default)]
	pub algorithm: Algorithm,
}
impl EndpointLimit {
	/// Sliding-window limit of `max_requests` per `window`.
	pub fn sliding_window(max_requests: u32, window: Duration) -> Self {
		Self { max_requests, window, algorithm: Algorithm::SlidingWindow }
	}

	/// Token-bucket limit with capacity `max_requests`, refilled over `window`.
	pub fn token_bucket(max_requests: u32, window: Duration) -> Self {
		Self { max_requests, window, algorithm: Algorithm::TokenBucket }
	}

	/// Tokens restored per second when used as a token bucket.
	pub fn refill_per_second(&self) -> f64 {
		self.max_requests as f64 / self.window.as_secs_f64()
	}

	fn validate(&self, field: &'static str) -> Result<()> {
		if self.max_requests == 0 {
			return Err(Error::Validation { field, reason: "max_requests must be at least 1.".into() });
		}
		if self.max_requests > MAX_REQUESTS_PER_WINDOW {
			return Err(Error::Validation {
				field,
				reason: format!("max_requests must be at most {MAX_REQUESTS_PER_WINDOW}."),
			});
		}
		if self.window.is_zero() {
			return Err(Error::Validation {
				field,
				reason: "window must be greater than zero.".into(),
			});
		}
		if self.window > MAX_LIMIT_WINDOW {
			return Err(Error::Validation {
				field,
				reason: format!("window must be at most {MAX_LIMIT_WINDOW:?}."),
			});
		}

		Ok(())
	}
}

/// Process-wide sliding-window ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLimit {
	/// Requests admitted per window across all clients and endpoints.
	pub max_requests: u32,
	/// Window length.
	pub window: Duration,
}

/// Rate limiter configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Optional ceiling checked before any endpoint limit.
	pub global: Option<GlobalLimit>,
	/// Per-endpoint thresholds; endpoints not listed are not limited.
	pub endpoints: HashMap<String, EndpointLimit>,
	/// Whether forwarding headers may override the peer address when resolving client ids.
	///
	/// Only enable this behind a proxy that overwrites those headers.
	pub trust_proxy_headers: bool,
}
impl RateLimitConfig {
	/// Configuration without any limits.
	pub fn unlimited() -> Self {
		Self { global: None, endpoints: HashMap::new(), trust_proxy_headers: false }
	}

	/// Set or replace the global ceiling.
	pub fn with_global(mut self, max_requests: u32, window: Duration) -> Self {
		self.global = Some(GlobalLimit { max_requests, window });

		self
	}

	/// Set or replace the limit for `endpoint`.
	pub fn with_endpoint(mut self, endpoint: impl Into<String>, limit: EndpointLimit) -> Self {
		self.endpoints.insert(endpoint.into(), limit);

		self
	}

	/// Validate every configured threshold.
	pub fn validate(&self) -> Result<()> {
		if let Some(global) = &self.global {
			EndpointLimit::sliding_window(global.max_requests, global.window)
				.validate("rate_limit.global")?;
		}

		for limit in self.endpoints.values() {
			limit.validate("rate_limit.endpoints")?;
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self::unlimited()
			.with_global(1000, DEFAULT_LIMIT_WINDOW)
			.with_endpoint(ENDPOINT_METRICS, EndpointLimit::sliding_window(30, DEFAULT_LIMIT_WINDOW))
			.with_endpoint(ENDPOINT_HISTORY, EndpointLimit::sliding_window(20, DEFAULT_LIMIT_WINDOW))
			.with_endpoint(
				ENDPOINT_LOG_SUBMISSION,
				EndpointLimit::sliding_window(10, DEFAULT_LIMIT_WINDOW),
			)
			.with_endpoint(
				ENDPOINT_CLASSIFICATION,
				EndpointLimit::sliding_window(50, DEFAULT_LIMIT_WINDOW),
			)
	}
}
