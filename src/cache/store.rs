//! Bounded in-memory cache store with lazy expiry and LRU eviction.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
};
// crates.io
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::{CacheEntry, EntryInfo},
		refresher::{self, RefreshHandle},
	},
	config::CacheConfig,
	metrics::{self, CacheStats, CacheStatsSnapshot},
};

/// Boxed future returned by registered refresh functions.
pub type RefreshFuture<V> = Pin<Box<dyn Future<Output = Result<Option<V>>> + Send>>;

type RefreshFn<V> = Arc<dyn Fn() -> RefreshFuture<V> + Send + Sync>;

/// Process-local cache of computed values.
///
/// Cloning is cheap; clones share the same entries, refresh functions, and counters.
/// All entry state sits behind one mutex that is never held across a fetch or refresh call.
pub struct CacheStore<V> {
	inner: Arc<Mutex<StoreState<V>>>,
	config: Arc<CacheConfig>,
	stats: Arc<CacheStats>,
}
impl<V> CacheStore<V>
where
	V: Clone + Send + Sync + 'static,
{
	/// Build a store from a validated configuration.
	pub fn new(config: CacheConfig) -> Result<Self> {
		config.validate()?;

		tracing::info!(
			default_ttl = ?config.default_ttl,
			max_entries = config.max_entries,
			"cache store initialised"
		);

		Ok(Self {
			inner: Arc::new(Mutex::new(StoreState {
				entries: HashMap::with_capacity(config.max_entries),
				refresh_functions: HashMap::new(),
			})),
			config: Arc::new(config),
			stats: CacheStats::new(),
		})
	}

	/// Configuration the store was built with.
	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Look up a value, removing it when expired.
	pub async fn get(&self, key: &str) -> Option<V> {
		let now = Instant::now();
		let lookup = {
			let mut state = self.inner.lock().await;

			state.lookup(key, now)
		};

		self.observe_lookup(key, lookup)
	}

	/// Insert or replace a value; `None` applies the default TTL.
	///
	/// When the store is full and `key` is new, the least recently accessed entry is evicted
	/// first, with ties broken by key order.
	pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
		let key = key.into();
		let ttl = self.resolve_ttl(ttl)?;
		let now = Instant::now();
		let evicted = {
			let mut state = self.inner.lock().await;
			let evicted = if state.entries.len() >= self.config.max_entries
				&& !state.entries.contains_key(&key)
			{
				state.evict_lru()
			} else {
				None
			};

			state.entries.insert(key.clone(), CacheEntry::new(value, ttl, self.config.stale_after, now));

			evicted
		};

		if let Some(victim) = evicted {
			self.stats.record_eviction();
			metrics::record_cache_eviction();

			tracing::debug!(key = %victim, "evicted least recently used entry");
		}

		tracing::debug!(key = %key, ?ttl, "cached value");

		Ok(())
	}

	/// Remove an entry; returns whether it was present.
	pub async fn invalidate(&self, key: &str) -> bool {
		let removed = { self.inner.lock().await.entries.remove(key).is_some() };

		if removed {
			tracing::debug!(key, "invalidated entry");
		}

		removed
	}

	/// Remove every entry. Counters are kept.
	pub async fn clear(&self) {
		let count = {
			let mut state = self.inner.lock().await;
			let count = state.entries.len();

			state.entries.clear();

			count
		};

		tracing::info!(removed = count, "cache cleared");
	}

	/// Read-through lookup.
	///
	/// A hit returns the cached value. A miss calls `fetch` once for this call and caches a
	/// `Some` result. Concurrent misses on the same key may each call their own `fetch`.
	/// Fetch errors are counted and returned to the caller unchanged. A zero `ttl` is rejected
	/// before `fetch` runs.
	#[tracing::instrument(skip(self, fetch, ttl))]
	pub async fn get_or_set<F, Fut, E>(
		&self,
		key: &str,
		fetch: F,
		ttl: Option<Duration>,
	) -> std::result::Result<Option<V>, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = std::result::Result<Option<V>, E>>,
		E: From<Error> + Display,
	{
		let ttl = self.resolve_ttl(ttl)?;

		if let Some(value) = self.get(key).await {
			return Ok(Some(value));
		}

		match fetch().await {
			Ok(Some(value)) => {
				self.set(key, value.clone(), Some(ttl)).await?;

				Ok(Some(value))
			},
			Ok(None) => {
				tracing::debug!("fetch returned no value; nothing cached");

				Ok(None)
			},
			Err(err) => {
				self.stats.record_error();
				metrics::record_cache_error("fetch");

				tracing::error!(error = %err, "fetch for cache miss failed");

				Err(err)
			},
		}
	}

	/// Register the function the background refresher uses to regenerate `key`.
	///
	/// A later registration for the same key replaces the earlier one.
	pub async fn register_refresh_function<F, Fut>(&self, key: impl Into<String>, refresh: F)
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Option<V>>> + Send + 'static,
	{
		let key = key.into();
		let refresh: RefreshFn<V> = Arc::new(move || -> RefreshFuture<V> { Box::pin(refresh()) });

		self.inner.lock().await.refresh_functions.insert(key.clone(), refresh);

		tracing::debug!(key = %key, "refresh function registered");
	}

	/// Drop the refresh function for `key`; returns whether one was registered.
	pub async fn unregister_refresh_function(&self, key: &str) -> bool {
		self.inner.lock().await.refresh_functions.remove(key).is_some()
	}

	/// Run one refresh cycle over stale entries that have a registered refresh function.
	///
	/// Refresh functions run without the store lock. A successful result renews the entry in
	/// place; failures leave the previous value untouched.
	pub async fn refresh_stale(&self) -> RefreshReport {
		let now = Instant::now();
		let due = { self.inner.lock().await.due_for_refresh(now) };
		let mut report = RefreshReport::default();

		for (key, refresh) in due {
			let started = Instant::now();

			match refresh().await {
				Ok(Some(value)) => {
					let renewed = {
						let mut state = self.inner.lock().await;

						match state.entries.get_mut(&key) {
							Some(entry) => {
								entry.renew(value, Instant::now());

								true
							},
							None => false,
						}
					};

					if renewed {
						report.refreshed += 1;

						self.stats.record_refresh();
						metrics::record_cache_refresh(started.elapsed());

						tracing::debug!(key = %key, "refreshed stale entry in background");
					} else {
						report.skipped += 1;

						tracing::debug!(key = %key, "entry vanished during refresh; not reinserted");
					}
				},
				Ok(None) => {
					report.skipped += 1;

					tracing::debug!(key = %key, "refresh produced no value; entry left untouched");
				},
				Err(err) => {
					report.failed += 1;

					self.stats.record_error();
					metrics::record_cache_error("refresh");

					tracing::error!(key = %key, error = %err, "background refresh failed");
				},
			}
		}

		report
	}

	/// Start the periodic background refresher using the configured interval.
	pub fn spawn_refresher(&self) -> RefreshHandle {
		refresher::spawn(self.clone(), self.config.refresh_interval)
	}

	/// Number of entries currently held, including expired ones not yet read.
	pub async fn len(&self) -> usize {
		self.inner.lock().await.entries.len()
	}

	/// Whether the store holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	/// Snapshot of counters and sizing.
	pub async fn stats(&self) -> CacheStatsSnapshot {
		let (size, refresh_functions) = {
			let state = self.inner.lock().await;

			(state.entries.len(), state.refresh_functions.len())
		};

		self.stats.snapshot(size, &self.config, refresh_functions)
	}

	/// Per-entry freshness and access details.
	pub async fn entries_info(&self) -> HashMap<String, EntryInfo> {
		let now = Instant::now();
		let state = self.inner.lock().await;

		state.entries.iter().map(|(key, entry)| (key.clone(), entry.info(now))).collect()
	}

	fn resolve_ttl(&self, ttl: Option<Duration>) -> Result<Duration> {
		let ttl = ttl.unwrap_or(self.config.default_ttl);

		if ttl.is_zero() {
			return Err(Error::Validation {
				field: "ttl",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(ttl)
	}

	fn observe_lookup(&self, key: &str, lookup: Lookup<V>) -> Option<V> {
		match lookup {
			Lookup::Hit { value, stale, age, access_count } => {
				self.stats.record_hit();
				metrics::record_cache_hit(stale);

				if stale {
					tracing::debug!(key, ?age, "serving stale cache entry");
				} else {
					tracing::trace!(key, access_count, "cache hit");
				}

				Some(value)
			},
			Lookup::Expired => {
				self.stats.record_miss();
				metrics::record_cache_miss();

				tracing::debug!(key, "cache entry expired");

				None
			},
			Lookup::Miss => {
				self.stats.record_miss();
				metrics::record_cache_miss();

				tracing::trace!(key, "cache miss");

				None
			},
		}
	}
}
impl<V> Clone for CacheStore<V> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone(), config: self.config.clone(), stats: self.stats.clone() }
	}
}
impl<V> Debug for CacheStore<V> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("CacheStore")
			.field("config", &self.config)
			.field("stats", &self.stats)
			.finish_non_exhaustive()
	}
}

/// Outcome of one refresh cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
	/// Entries renewed with a fresh value.
	pub refreshed: usize,
	/// Entries whose refresh produced no value or that disappeared meanwhile.
	pub skipped: usize,
	/// Entries whose refresh function failed.
	pub failed: usize,
}

struct StoreState<V> {
	entries: HashMap<String, CacheEntry<V>>,
	refresh_functions: HashMap<String, RefreshFn<V>>,
}
impl<V> StoreState<V>
where
	V: Clone,
{
	fn lookup(&mut self, key: &str, now: Instant) -> Lookup<V> {
		let Some(entry) = self.entries.get_mut(key) else {
			return Lookup::Miss;
		};

		if entry.is_expired(now) {
			self.entries.remove(key);

			return Lookup::Expired;
		}

		let stale = entry.is_stale(now);
		let age = entry.age(now);
		let value = entry.access(now);

		Lookup::Hit { value, stale, age, access_count: entry.access_count() }
	}

	fn evict_lru(&mut self) -> Option<String> {
		let victim = self
			.entries
			.iter()
			.min_by(|(key_a, a), (key_b, b)| {
				a.last_accessed_at().cmp(&b.last_accessed_at()).then_with(|| key_a.cmp(key_b))
			})
			.map(|(key, _)| key.clone())?;

		self.entries.remove(&victim);

		Some(victim)
	}

	fn due_for_refresh(&self, now: Instant) -> Vec<(String, RefreshFn<V>)> {
		self.entries
			.iter()
			.filter(|(_, entry)| entry.is_stale(now))
			.filter_map(|(key, _)| {
				self.refresh_functions.get(key).map(|refresh| (key.clone(), refresh.clone()))
			})
			.collect()
	}
}

enum Lookup<V> {
	Hit { value: V, stale: bool, age: Duration, access_count: u64 },
	Expired,
	Miss,
}
