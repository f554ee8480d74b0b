//! Composition root wiring admission, caching, and retries into one call chain.

// std
use std::{future::Future, net::IpAddr};
// crates.io
use http::HeaderMap;
// self
use crate::{
	_prelude::*,
	cache::{refresher::RefreshHandle, store::CacheStore},
	config::GuardConfig,
	limiter::service::{Admission, RateLimiter},
	retry::{RetryExecutor, RetryPolicy},
};

/// Owns one cache store, one rate limiter, and the background refresher.
///
/// Must be started inside a Tokio runtime.
#[derive(Debug)]
pub struct Guard<V> {
	cache: CacheStore<V>,
	limiter: RateLimiter,
	refresher: Option<RefreshHandle>,
}
impl<V> Guard<V>
where
	V: Clone + Send + Sync + 'static,
{
	/// Validate `config`, build every component, and spawn the refresher.
	pub fn start(config: GuardConfig) -> Result<Self> {
		config.validate()?;

		let GuardConfig { cache, rate_limit } = config;
		let cache = CacheStore::new(cache)?;
		let limiter = RateLimiter::new(rate_limit)?;
		let refresher = Some(cache.spawn_refresher());

		tracing::info!("resource guard started");

		Ok(Self { cache, limiter, refresher })
	}

	/// Shared cache store.
	pub fn cache(&self) -> &CacheStore<V> {
		&self.cache
	}

	/// Shared rate limiter.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Resolve the client id for a request using the configured proxy trust.
	pub fn client_id(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
		self.limiter.identity().resolve(headers, peer)
	}

	/// Admission check only.
	pub async fn admit(&self, endpoint: &str, client_id: &str) -> Admission {
		self.limiter.is_allowed(endpoint, client_id).await
	}

	/// Admission, then a cache read-through whose miss path runs `fetch` under `policy`.
	///
	/// A blocked request fails with [`Error::RateLimited`] before the cache is consulted.
	/// `Ok(None)` means the fetch produced no value and nothing was cached.
	#[tracing::instrument(skip(self, ttl, policy, fetch))]
	pub async fn serve<F, Fut>(
		&self,
		endpoint: &str,
		client_id: &str,
		key: &str,
		ttl: Option<Duration>,
		policy: &RetryPolicy,
		fetch: F,
	) -> Result<Option<V>>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<Option<V>>>,
	{
		self.limiter.is_allowed(endpoint, client_id).await.into_result()?;

		self.cache
			.get_or_set(key, || RetryExecutor::new(policy).named(endpoint).execute(fetch), ttl)
			.await
	}

	/// Stop the refresher and wait for its in-flight cycle.
	pub async fn shutdown(mut self) -> Result<()> {
		if let Some(refresher) = self.refresher.take() {
			refresher.shutdown().await?;
		}

		tracing::info!("resource guard stopped");

		Ok(())
	}
}
