//! Rate limiter service combining a global ceiling with lazily created per-client limiters.

// std
use std::collections::{BTreeMap, HashMap, HashSet};
// crates.io
use serde::Serialize;
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	config::RateLimitConfig,
	limiter::{LimitScope, Limiter, LimiterStatus, client::ClientIdentity, window::SlidingWindow},
	metrics,
};

const TOP_BLOCKED_CLIENTS: usize = 10;

/// Admission control shared by every request-handling task.
///
/// Cloning is cheap; clones share limiter instances and statistics.
#[derive(Clone, Debug)]
pub struct RateLimiter {
	inner: Arc<Mutex<LimiterState>>,
	config: Arc<RateLimitConfig>,
}
impl RateLimiter {
	/// Build a rate limiter from a validated configuration.
	pub fn new(config: RateLimitConfig) -> Result<Self> {
		config.validate()?;

		if let Some(global) = &config.global {
			tracing::info!(
				max_requests = global.max_requests,
				window = ?global.window,
				"global rate limit configured"
			);
		}
		for (endpoint, limit) in &config.endpoints {
			tracing::info!(
				endpoint = %endpoint,
				max_requests = limit.max_requests,
				window = ?limit.window,
				algorithm = ?limit.algorithm,
				"endpoint rate limit configured"
			);
		}

		let global = config.global.map(|limit| SlidingWindow::new(limit.max_requests, limit.window));

		Ok(Self {
			inner: Arc::new(Mutex::new(LimiterState {
				global,
				instances: HashMap::new(),
				stats: LimiterStats::default(),
			})),
			config: Arc::new(config),
		})
	}

	/// Configuration the limiter was built with.
	pub fn config(&self) -> &RateLimitConfig {
		&self.config
	}

	/// Client id resolver honouring the configured proxy trust.
	pub fn identity(&self) -> ClientIdentity {
		ClientIdentity::new(self.config.trust_proxy_headers)
	}

	/// Decide whether `client_id` may call `endpoint` now.
	///
	/// The global ceiling is checked first; when it blocks, no per-endpoint limiter is touched
	/// or created. Endpoints without a configured limit are always admitted.
	pub async fn is_allowed(&self, endpoint: &str, client_id: &str) -> Admission {
		let now = Instant::now();
		let admission = {
			let mut guard = self.inner.lock().await;
			let state = &mut *guard;

			state.stats.observe_client(client_id);

			if let Some(global) = state.global.as_mut()
				&& !global.is_allowed_at(now)
			{
				let status = LimiterStatus::SlidingWindow(global.status(now));
				let retry_after = Some(global.retry_after(now));

				state.stats.record_blocked(client_id);

				Admission::blocked(LimitScope::Global, endpoint, client_id, status, retry_after)
			} else if let Some(limit) = self.config.endpoints.get(endpoint) {
				let limiter = state
					.instances
					.entry(ClientEndpointKey::new(client_id, endpoint))
					.or_insert_with(|| Limiter::from_limit(limit, now));

				if limiter.check(now) {
					let status = limiter.status(now);

					state.stats.allowed += 1;

					Admission::allowed(endpoint, client_id, Some(status))
				} else {
					let status = limiter.status(now);
					let retry_after = limiter.retry_after(now);

					state.stats.record_blocked(client_id);

					Admission::blocked(LimitScope::Endpoint, endpoint, client_id, status, retry_after)
				}
			} else {
				state.stats.allowed += 1;

				Admission::allowed(endpoint, client_id, None)
			}
		};

		metrics::record_limiter_decision(endpoint, admission.allowed, admission.scope.as_str());

		if admission.allowed {
			tracing::debug!(endpoint, client = client_id, "request admitted");
		} else {
			tracing::warn!(
				endpoint,
				client = client_id,
				scope = admission.scope.as_str(),
				retry_after = ?admission.retry_after,
				"rate limit exceeded"
			);
		}

		admission
	}

	/// Drop every per-endpoint limiter of `client_id`; returns how many were removed.
	pub async fn reset_client_limits(&self, client_id: &str) -> usize {
		let removed = {
			let mut state = self.inner.lock().await;
			let before = state.instances.len();

			state.instances.retain(|key, _| key.client_id != client_id);

			before - state.instances.len()
		};

		tracing::info!(client = client_id, removed, "client rate limits reset");

		removed
	}

	/// Number of live per-(client, endpoint) limiter instances.
	pub async fn instance_count(&self) -> usize {
		self.inner.lock().await.instances.len()
	}

	/// Snapshot of aggregate admission statistics.
	pub async fn stats(&self) -> LimiterStatsSnapshot {
		let state = self.inner.lock().await;
		let mut top_blocked: Vec<(String, u64)> =
			state.stats.blocked_clients.iter().map(|(client, count)| (client.clone(), *count)).collect();

		top_blocked.sort_unstable_by(|(client_a, a), (client_b, b)| {
			b.cmp(a).then_with(|| client_a.cmp(client_b))
		});
		top_blocked.truncate(TOP_BLOCKED_CLIENTS);

		LimiterStatsSnapshot {
			allowed: state.stats.allowed,
			blocked: state.stats.blocked,
			unique_clients: state.stats.seen_clients.len(),
			top_blocked,
		}
	}

	/// Current limiter state for one client.
	pub async fn client_status(&self, client_id: &str) -> ClientStatus {
		let now = Instant::now();
		let state = self.inner.lock().await;
		let endpoints = state
			.instances
			.iter()
			.filter(|(key, _)| key.client_id == client_id)
			.map(|(key, limiter)| (key.endpoint.clone(), limiter.status(now)))
			.collect();

		ClientStatus {
			client_id: client_id.to_owned(),
			global: state.global.as_ref().map(|global| LimiterStatus::SlidingWindow(global.status(now))),
			endpoints,
		}
	}
}

/// Outcome of an admission check.
#[derive(Clone, Debug, Serialize)]
pub struct Admission {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// Limiter that blocked the request, or [`LimitScope::None`].
	pub scope: LimitScope,
	/// Endpoint that was checked.
	pub endpoint: String,
	/// Client identifier that was checked.
	pub client_id: String,
	/// State of the deciding limiter, when one was consulted.
	pub status: Option<LimiterStatus>,
	/// Suggested wait before retrying a blocked request.
	pub retry_after: Option<Duration>,
}
impl Admission {
	fn allowed(endpoint: &str, client_id: &str, status: Option<LimiterStatus>) -> Self {
		Self {
			allowed: true,
			scope: LimitScope::None,
			endpoint: endpoint.to_owned(),
			client_id: client_id.to_owned(),
			status,
			retry_after: None,
		}
	}

	fn blocked(
		scope: LimitScope,
		endpoint: &str,
		client_id: &str,
		status: LimiterStatus,
		retry_after: Option<Duration>,
	) -> Self {
		Self {
			allowed: false,
			scope,
			endpoint: endpoint.to_owned(),
			client_id: client_id.to_owned(),
			status: Some(status),
			retry_after,
		}
	}

	/// Whether the request may proceed.
	pub fn is_allowed(&self) -> bool {
		self.allowed
	}

	/// Turn a block into [`Error::RateLimited`].
	pub fn into_result(self) -> Result<Self> {
		if self.allowed {
			Ok(self)
		} else {
			Err(Error::RateLimited {
				scope: self.scope,
				client: self.client_id,
				retry_after: self.retry_after,
			})
		}
	}
}

/// Aggregate admission statistics.
#[derive(Clone, Debug, Serialize)]
pub struct LimiterStatsSnapshot {
	/// Requests admitted.
	pub allowed: u64,
	/// Requests blocked by any limiter.
	pub blocked: u64,
	/// Distinct client identifiers observed.
	pub unique_clients: usize,
	/// Clients with the most blocks, highest first.
	pub top_blocked: Vec<(String, u64)>,
}
impl LimiterStatsSnapshot {
	/// Total decisions taken.
	pub fn total_requests(&self) -> u64 {
		self.allowed + self.blocked
	}

	/// Ratio of blocked decisions over all decisions.
	pub fn block_rate(&self) -> f64 {
		match self.total_requests() {
			0 => 0.0,
			total => self.blocked as f64 / total as f64,
		}
	}
}

/// Limiter state for a single client.
#[derive(Clone, Debug, Serialize)]
pub struct ClientStatus {
	/// Client identifier.
	pub client_id: String,
	/// Global ceiling status, shared by all clients.
	pub global: Option<LimiterStatus>,
	/// Status of every limiter instance this client owns, keyed by endpoint.
	pub endpoints: BTreeMap<String, LimiterStatus>,
}

/// Internal key mapping clients and endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ClientEndpointKey {
	client_id: String,
	endpoint: String,
}
impl ClientEndpointKey {
	fn new(client_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
		Self { client_id: client_id.into(), endpoint: endpoint.into() }
	}
}

#[derive(Debug)]
struct LimiterState {
	global: Option<SlidingWindow>,
	instances: HashMap<ClientEndpointKey, Limiter>,
	stats: LimiterStats,
}

#[derive(Debug, Default)]
struct LimiterStats {
	allowed: u64,
	blocked: u64,
	blocked_clients: HashMap<String, u64>,
	seen_clients: HashSet<String>,
}
impl LimiterStats {
	fn observe_client(&mut self, client_id: &str) {
		if !self.seen_clients.contains(client_id) {
			self.seen_clients.insert(client_id.to_owned());
		}
	}

	fn record_blocked(&mut self, client_id: &str) {
		self.blocked += 1;

		*self.blocked_clients.entry(client_id.to_owned()).or_default() += 1;
	}
}
