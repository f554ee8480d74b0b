//! Metrics helpers and in-process counter bookkeeping.
//!
//! Every function here reports through the `metrics` facade. Without an installed recorder the
//! calls are no-ops, so the observability path can never influence cache or limiter decisions.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use smallvec::SmallVec;
// self
use crate::{_prelude::*, config::CacheConfig};

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_CACHE_HITS_TOTAL: &str = "resource_guard_cache_hits_total";
const METRIC_CACHE_STALE_TOTAL: &str = "resource_guard_cache_stale_total";
const METRIC_CACHE_MISSES_TOTAL: &str = "resource_guard_cache_misses_total";
const METRIC_CACHE_EVICTIONS_TOTAL: &str = "resource_guard_cache_evictions_total";
const METRIC_CACHE_REFRESHES_TOTAL: &str = "resource_guard_cache_refreshes_total";
const METRIC_CACHE_REFRESH_DURATION: &str = "resource_guard_cache_refresh_duration_seconds";
const METRIC_CACHE_ERRORS_TOTAL: &str = "resource_guard_cache_errors_total";
const METRIC_LIMITER_DECISIONS_TOTAL: &str = "resource_guard_limiter_decisions_total";
const METRIC_RETRY_ATTEMPTS_TOTAL: &str = "resource_guard_retry_attempts_total";
const METRIC_RETRY_FALLBACKS_TOTAL: &str = "resource_guard_retry_fallbacks_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe counters for a cache store.
#[derive(Debug, Default)]
pub struct CacheStats {
	hits: AtomicU64,
	misses: AtomicU64,
	evictions: AtomicU64,
	refreshes: AtomicU64,
	errors: AtomicU64,
}
impl CacheStats {
	/// Create a new counter set.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a cache hit.
	pub fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a miss, including lazily expired entries.
	pub fn record_miss(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a capacity eviction.
	pub fn record_eviction(&self) {
		self.evictions.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful background refresh.
	pub fn record_refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a fetch or refresh failure.
	pub fn record_error(&self) {
		self.errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(
		&self,
		size: usize,
		config: &CacheConfig,
		refresh_functions: usize,
	) -> CacheStatsSnapshot {
		CacheStatsSnapshot {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			refreshes: self.refreshes.load(Ordering::Relaxed),
			errors: self.errors.load(Ordering::Relaxed),
			size,
			max_entries: config.max_entries,
			default_ttl: config.default_ttl,
			refresh_functions,
		}
	}
}

/// Read-only snapshot of cache counters.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatsSnapshot {
	/// Lookups served from the cache.
	pub hits: u64,
	/// Lookups that found nothing usable.
	pub misses: u64,
	/// Entries removed to respect the capacity bound.
	pub evictions: u64,
	/// Entries renewed by the background refresher.
	pub refreshes: u64,
	/// Failed fetch or refresh calls.
	pub errors: u64,
	/// Entries held at capture time.
	pub size: usize,
	/// Capacity bound.
	pub max_entries: usize,
	/// TTL applied when `set` omits one.
	pub default_ttl: Duration,
	/// Number of registered refresh functions.
	pub refresh_functions: usize,
}
impl CacheStatsSnapshot {
	/// Total lookups observed.
	pub fn total_requests(&self) -> u64 {
		self.hits + self.misses
	}

	/// Convenience method to compute the cache hit rate.
	pub fn hit_rate(&self) -> f64 {
		match self.total_requests() {
			0 => 0.0,
			total => self.hits as f64 / total as f64,
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a cache hit, tagging whether it was served stale.
pub fn record_cache_hit(stale: bool) {
	metrics::counter!(METRIC_CACHE_HITS_TOTAL).increment(1);

	if stale {
		metrics::counter!(METRIC_CACHE_STALE_TOTAL).increment(1);
	}
}

/// Record a cache miss.
pub fn record_cache_miss() {
	metrics::counter!(METRIC_CACHE_MISSES_TOTAL).increment(1);
}

/// Record a capacity eviction.
pub fn record_cache_eviction() {
	metrics::counter!(METRIC_CACHE_EVICTIONS_TOTAL).increment(1);
}

/// Record a background refresh along with its latency.
pub fn record_cache_refresh(duration: Duration) {
	metrics::counter!(METRIC_CACHE_REFRESHES_TOTAL).increment(1);
	metrics::histogram!(METRIC_CACHE_REFRESH_DURATION).record(duration.as_secs_f64());
}

/// Record a failed fetch (`source = "fetch"`) or refresh (`source = "refresh"`).
pub fn record_cache_error(source: &'static str) {
	metrics::counter!(METRIC_CACHE_ERRORS_TOTAL, "source" => source).increment(1);
}

/// Record an admission decision.
pub fn record_limiter_decision(endpoint: &str, allowed: bool, scope: &'static str) {
	let mut labels = LabelSet::with_capacity(3);

	labels.push(Label::new("endpoint", endpoint.to_owned()));
	labels.push(Label::new("decision", if allowed { "allowed" } else { "blocked" }));
	labels.push(Label::new("scope", scope));

	metrics::counter!(METRIC_LIMITER_DECISIONS_TOTAL, labels.iter()).increment(1);
}

/// Record one call of a retried operation; the first call and successful calls count too.
pub fn record_retry_attempt(operation: &str) {
	metrics::counter!(METRIC_RETRY_ATTEMPTS_TOTAL, operation_labels(operation).iter()).increment(1);
}

/// Record that a fallback value replaced an exhausted operation.
pub fn record_retry_fallback(operation: &str) {
	metrics::counter!(METRIC_RETRY_FALLBACKS_TOTAL, operation_labels(operation).iter())
		.increment(1);
}

fn operation_labels(operation: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("operation", operation.to_owned()));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter
			.snapshot()
			.into_vec()
			.into_iter()
			.map(|(key, _, _, value)| (key, value))
			.collect()
	}

	fn counter_value(
		snapshot: &[(CompositeKey, DebugValue)],
		name: &str,
		labels: &[(&str, &str)],
	) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> =
			key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels == expected_sorted
	}

	#[test]
	fn records_cache_lifecycle_counters() {
		let snapshot = capture_metrics(|| {
			record_cache_hit(false);
			record_cache_hit(true);
			record_cache_miss();
			record_cache_eviction();
			record_cache_error("refresh");
		});

		assert_eq!(counter_value(&snapshot, "resource_guard_cache_hits_total", &[]), 2);
		assert_eq!(counter_value(&snapshot, "resource_guard_cache_stale_total", &[]), 1);
		assert_eq!(counter_value(&snapshot, "resource_guard_cache_misses_total", &[]), 1);
		assert_eq!(counter_value(&snapshot, "resource_guard_cache_evictions_total", &[]), 1);
		assert_eq!(
			counter_value(&snapshot, "resource_guard_cache_errors_total", &[("source", "refresh")]),
			1
		);
	}

	#[test]
	fn records_limiter_and_retry_counters() {
		let snapshot = capture_metrics(|| {
			record_limiter_decision("/api/metrics", true, "none");
			record_limiter_decision("/api/metrics", false, "endpoint");
			record_retry_attempt("load-metrics");
			record_retry_fallback("load-metrics");
		});
		let blocked = [("endpoint", "/api/metrics"), ("decision", "blocked"), ("scope", "endpoint")];
		let operation = [("operation", "load-metrics")];

		assert_eq!(counter_value(&snapshot, "resource_guard_limiter_decisions_total", &blocked), 1);
		assert_eq!(counter_value(&snapshot, "resource_guard_retry_attempts_total", &operation), 1);
		assert_eq!(counter_value(&snapshot, "resource_guard_retry_fallbacks_total", &operation), 1);
	}

	#[test]
	fn hit_rate_handles_empty_and_mixed_counts() {
		let stats = CacheStats::default();
		let config = CacheConfig::default();

		assert_eq!(stats.snapshot(0, &config, 0).hit_rate(), 0.0);

		stats.record_hit();
		stats.record_hit();
		stats.record_hit();
		stats.record_miss();

		let snapshot = stats.snapshot(3, &config, 1);

		assert_eq!(snapshot.total_requests(), 4);
		assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
	}
}
