//! Sliding window admission algorithm.

// std
use std::collections::VecDeque;
// crates.io
use serde::Serialize;
// self
use crate::_prelude::*;

const PREALLOCATED_SLOTS: usize = 64;

/// Exact count of admissions within a trailing window.
#[derive(Clone, Debug)]
pub struct SlidingWindow {
	max_requests: u32,
	window: Duration,
	timestamps: VecDeque<Instant>,
}
impl SlidingWindow {
	/// Create an empty window.
	pub fn new(max_requests: u32, window: Duration) -> Self {
		Self {
			max_requests,
			window,
			timestamps: VecDeque::with_capacity((max_requests as usize).min(PREALLOCATED_SLOTS)),
		}
	}

	/// Admit a request now if the window has room.
	pub fn is_allowed(&mut self) -> bool {
		self.is_allowed_at(Instant::now())
	}

	/// Admit a request at `now` if the window has room, recording it.
	pub fn is_allowed_at(&mut self, now: Instant) -> bool {
		self.prune(now);

		if self.timestamps.len() < self.max_requests as usize {
			self.timestamps.push_back(now);

			true
		} else {
			false
		}
	}

	/// Admissions currently inside the window.
	pub fn current_count(&mut self, now: Instant) -> usize {
		self.prune(now);

		self.timestamps.len()
	}

	/// Time until the oldest admission leaves the window; zero when there is room.
	///
	/// Saturates at [`Duration::MAX`] when the window end is beyond the clock's range.
	pub fn retry_after(&self, now: Instant) -> Duration {
		if self.count_at(now) < self.max_requests as usize {
			return Duration::ZERO;
		}

		self.timestamps
			.iter()
			.find(|ts| now.saturating_duration_since(**ts) < self.window)
			.map(|oldest| {
				oldest
					.checked_add(self.window)
					.map_or(Duration::MAX, |reopens_at| reopens_at.saturating_duration_since(now))
			})
			.unwrap_or(Duration::ZERO)
	}

	/// Status projection for diagnostics.
	pub fn status(&self, now: Instant) -> WindowStatus {
		let current = self.count_at(now);

		WindowStatus {
			current_requests: current,
			max_requests: self.max_requests,
			window: self.window,
			usage_percentage: if self.max_requests == 0 {
				100.0
			} else {
				current as f64 / f64::from(self.max_requests) * 100.0
			},
		}
	}

	fn count_at(&self, now: Instant) -> usize {
		self.timestamps.iter().filter(|ts| now.saturating_duration_since(**ts) < self.window).count()
	}

	fn prune(&mut self, now: Instant) {
		while let Some(oldest) = self.timestamps.front()
			&& now.saturating_duration_since(*oldest) >= self.window
		{
			self.timestamps.pop_front();
		}
	}
}

/// Sliding window state at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct WindowStatus {
	/// Admissions inside the window.
	pub current_requests: usize,
	/// Admissions allowed per window.
	pub max_requests: u32,
	/// Window length.
	pub window: Duration,
	/// `current_requests / max_requests` as a percentage.
	pub usage_percentage: f64,
}
