//! Token bucket admission algorithm.

// crates.io
use serde::Serialize;
// self
use crate::_prelude::*;

/// Bucket holding up to `capacity` fractional tokens, refilled continuously.
#[derive(Clone, Debug)]
pub struct TokenBucket {
	capacity: f64,
	refill_per_second: f64,
	tokens: f64,
	last_refill_at: Instant,
}
impl TokenBucket {
	/// Create a full bucket.
	pub fn new(capacity: u32, refill_per_second: f64) -> Self {
		Self::with_instant(capacity, refill_per_second, Instant::now())
	}

	/// Create a full bucket whose refill clock starts at `now`.
	pub fn with_instant(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
		let capacity = f64::from(capacity);

		Self { capacity, refill_per_second: refill_per_second.max(0.0), tokens: capacity, last_refill_at: now }
	}

	/// Try to take `n` tokens now.
	pub fn consume(&mut self, n: u32) -> bool {
		self.consume_at(n, Instant::now())
	}

	/// Try to take `n` tokens at `now`; on failure nothing is taken.
	pub fn consume_at(&mut self, n: u32, now: Instant) -> bool {
		self.refill(now);

		let wanted = f64::from(n);

		if self.tokens >= wanted {
			self.tokens -= wanted;

			true
		} else {
			false
		}
	}

	/// Tokens currently held, without refilling.
	pub fn tokens(&self) -> f64 {
		self.tokens
	}

	/// Maximum tokens the bucket can hold.
	pub fn capacity(&self) -> f64 {
		self.capacity
	}

	/// Time until `n` tokens will be available, assuming no other consumers.
	///
	/// `None` when `n` exceeds capacity or the wait is not representable.
	pub fn retry_after(&self, n: u32, now: Instant) -> Option<Duration> {
		let wanted = f64::from(n);

		if wanted > self.capacity || self.refill_per_second <= 0.0 {
			return None;
		}

		let missing = wanted - self.available_at(now);

		if missing <= 0.0 {
			Some(Duration::ZERO)
		} else {
			Duration::try_from_secs_f64(missing / self.refill_per_second).ok()
		}
	}

	/// Status projection for diagnostics.
	pub fn status(&self, now: Instant) -> BucketStatus {
		let tokens = self.available_at(now);

		BucketStatus {
			tokens,
			capacity: self.capacity,
			refill_per_second: self.refill_per_second,
			fill_percentage: if self.capacity > 0.0 { tokens / self.capacity * 100.0 } else { 0.0 },
		}
	}

	fn available_at(&self, now: Instant) -> f64 {
		let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();

		(self.tokens + elapsed * self.refill_per_second).min(self.capacity)
	}

	fn refill(&mut self, now: Instant) {
		self.tokens = self.available_at(now);

		if now > self.last_refill_at {
			self.last_refill_at = now;
		}
	}
}

/// Token bucket state at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BucketStatus {
	/// Tokens available including pending refill.
	pub tokens: f64,
	/// Maximum tokens.
	pub capacity: f64,
	/// Tokens restored per second.
	pub refill_per_second: f64,
	/// `tokens / capacity` as a percentage.
	pub fill_percentage: f64,
}
