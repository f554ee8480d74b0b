//! Cache entry definitions and freshness helpers.

// crates.io
use serde::Serialize;
// self
use crate::_prelude::*;

/// Default soft threshold after which an entry is considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// A single cached value with its freshness window and access statistics.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
	value: V,
	created_at: Instant,
	created_at_wallclock: DateTime<Utc>,
	ttl: Duration,
	stale_after: Duration,
	access_count: u64,
	last_accessed_at: Instant,
}
impl<V> CacheEntry<V> {
	/// Create a new entry stamped at `now`.
	pub fn new(value: V, ttl: Duration, stale_after: Duration, now: Instant) -> Self {
		Self {
			value,
			created_at: now,
			created_at_wallclock: Utc::now(),
			ttl,
			stale_after,
			access_count: 0,
			last_accessed_at: now,
		}
	}

	/// Borrow the cached value without touching access statistics.
	pub fn value(&self) -> &V {
		&self.value
	}

	/// Monotonic instant of the last insertion or refresh.
	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	/// Validity window of the entry.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Soft threshold after which the entry is eligible for background refresh.
	pub fn stale_after(&self) -> Duration {
		self.stale_after
	}

	/// Number of successful reads.
	pub fn access_count(&self) -> u64 {
		self.access_count
	}

	/// Monotonic instant of the most recent read (or creation when never read).
	pub fn last_accessed_at(&self) -> Instant {
		self.last_accessed_at
	}

	/// Age of the entry at `now`.
	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.created_at)
	}

	/// Whether the entry has outlived its TTL.
	pub fn is_expired(&self, now: Instant) -> bool {
		self.age(now) > self.ttl
	}

	/// Whether the entry is past its stale threshold but not yet expired.
	pub fn is_stale(&self, now: Instant) -> bool {
		self.age(now) > self.stale_after && !self.is_expired(now)
	}

	/// Replace the value after a background refresh.
	///
	/// TTL, stale threshold, and access statistics are preserved.
	pub fn renew(&mut self, value: V, now: Instant) {
		self.value = value;
		self.created_at = now;
		self.created_at_wallclock = Utc::now();
	}

	/// Describe the entry for status reporting.
	pub fn info(&self, now: Instant) -> EntryInfo {
		let idle = now.saturating_duration_since(self.last_accessed_at);
		let last_accessed = TimeDelta::from_std(idle)
			.ok()
			.and_then(|delta| Utc::now().checked_sub_signed(delta));

		EntryInfo {
			created_at: self.created_at_wallclock,
			age: self.age(now),
			ttl: self.ttl,
			access_count: self.access_count,
			last_accessed,
			is_expired: self.is_expired(now),
			is_stale: self.is_stale(now),
		}
	}
}
impl<V> CacheEntry<V>
where
	V: Clone,
{
	/// Record a read and hand out a clone of the value.
	pub fn access(&mut self, now: Instant) -> V {
		self.access_count = self.access_count.saturating_add(1);
		self.last_accessed_at = now;

		self.value.clone()
	}
}

/// Point-in-time description of a cache entry.
#[derive(Clone, Debug, Serialize)]
pub struct EntryInfo {
	/// Wall-clock time of the last insertion or refresh.
	pub created_at: DateTime<Utc>,
	/// Age at capture time.
	pub age: Duration,
	/// Configured validity window.
	pub ttl: Duration,
	/// Number of successful reads.
	pub access_count: u64,
	/// Approximate wall-clock time of the most recent read.
	pub last_accessed: Option<DateTime<Utc>>,
	/// Whether the entry had expired at capture time.
	pub is_expired: bool,
	/// Whether the entry was stale at capture time.
	pub is_stale: bool,
}
