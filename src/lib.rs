//! Async resource protection for request-serving code: a TTL/LRU cache with background refresh,
//! token-bucket and sliding-window rate limiting, and retry with exponential backoff.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod guard;
pub mod limiter;
pub mod metrics;
pub mod retry;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{entry::EntryInfo, store::CacheStore},
	config::{CacheConfig, EndpointLimit, GuardConfig, RateLimitConfig},
	error::{Classify, Error, ErrorKind, Result},
	guard::Guard,
	limiter::{
		LimitScope,
		service::{Admission, RateLimiter},
	},
	retry::{RetryExecutor, RetryPolicy},
};
