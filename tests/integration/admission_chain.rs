// std
use std::{
	sync::atomic::{AtomicU32, Ordering},
	time::Duration,
};
// crates.io
use resource_guard::{
	EndpointLimit, Error, ErrorKind, Guard, GuardConfig, LimitScope, RateLimitConfig, RateLimiter,
	RetryExecutor, RetryPolicy,
};
use tokio::time;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(start_paused = true)]
async fn five_token_bucket_admits_burst_then_one_per_second() {
	init_tracing();

	// Capacity 5, refilled at 1 token per second.
	let limiter = RateLimiter::new(
		RateLimitConfig::unlimited()
			.with_endpoint("/analisar_logs", EndpointLimit::token_bucket(5, Duration::from_secs(5))),
	)
	.expect("limiter");

	for _ in 0..5 {
		assert!(limiter.is_allowed("/analisar_logs", "198.51.100.2").await.is_allowed());
	}

	let blocked = limiter.is_allowed("/analisar_logs", "198.51.100.2").await;

	assert!(!blocked.is_allowed());
	assert_eq!(blocked.scope, LimitScope::Endpoint);
	assert!(blocked.retry_after.is_some_and(|wait| wait <= Duration::from_secs(1)));

	time::advance(Duration::from_secs(1)).await;

	assert!(limiter.is_allowed("/analisar_logs", "198.51.100.2").await.is_allowed());
	assert!(!limiter.is_allowed("/analisar_logs", "198.51.100.2").await.is_allowed());

	let stats = limiter.stats().await;

	assert_eq!((stats.allowed, stats.blocked), (6, 2));
	assert_eq!(stats.top_blocked[0].0, "198.51.100.2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_lose_a_decision() {
	init_tracing();

	let limiter = RateLimiter::new(
		RateLimitConfig::unlimited()
			.with_global(50, Duration::from_secs(60))
			.with_endpoint("/api/metrics", EndpointLimit::sliding_window(10, Duration::from_secs(60))),
	)
	.expect("limiter");
	let tasks: Vec<_> = (0..16)
		.map(|worker| {
			let limiter = limiter.clone();

			tokio::spawn(async move {
				let client = format!("client-{}", worker % 4);
				let mut admitted = 0_u64;

				for _ in 0..25 {
					if limiter.is_allowed("/api/metrics", &client).await.is_allowed() {
						admitted += 1;
					}
				}

				admitted
			})
		})
		.collect();
	let mut admitted = 0;

	for task in tasks {
		admitted += task.await.expect("caller task");
	}

	let stats = limiter.stats().await;

	// Four clients with ten slots each stay under the global ceiling of fifty.
	assert_eq!(admitted, 40);
	assert_eq!(stats.allowed, 40);
	assert_eq!(stats.allowed + stats.blocked, 16 * 25);
	assert_eq!(stats.unique_clients, 4);
	assert_eq!(limiter.instance_count().await, 4);
}

#[tokio::test(start_paused = true)]
async fn global_ceiling_blocks_before_endpoint_limiters_exist() {
	init_tracing();

	let limiter = RateLimiter::new(
		RateLimitConfig::unlimited()
			.with_global(2, Duration::from_secs(60))
			.with_endpoint("/api/metrics", EndpointLimit::sliding_window(30, Duration::from_secs(60))),
	)
	.expect("limiter");

	assert!(limiter.is_allowed("/api/metrics", "a").await.is_allowed());
	assert!(limiter.is_allowed("/api/metrics", "b").await.is_allowed());

	let blocked = limiter.is_allowed("/api/metrics", "c").await;

	assert_eq!(blocked.scope, LimitScope::Global);
	assert_eq!(limiter.instance_count().await, 2);
	assert!(limiter.client_status("c").await.endpoints.is_empty());

	time::advance(Duration::from_secs(60)).await;

	assert!(limiter.is_allowed("/api/metrics", "c").await.is_allowed());
	assert_eq!(limiter.instance_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn guard_serves_through_admission_cache_and_retry() {
	init_tracing();

	let config = GuardConfig::from_json(
		r#"{
			"rate_limit": {
				"global": null,
				"endpoints": {
					"/api/analysis-history": {
						"max_requests": 3,
						"window": { "secs": 60, "nanos": 0 }
					}
				}
			}
		}"#,
	)
	.expect("config");
	let guard: Guard<Vec<u32>> = Guard::start(config).expect("guard");
	let calls = AtomicU32::new(0);
	let policy = RetryPolicy {
		max_attempts: 3,
		base_delay: Duration::from_millis(50),
		max_delay: Duration::from_millis(200),
		..RetryPolicy::default()
	};
	// Fails twice with a transient error, then succeeds.
	let fetch = || {
		let call = calls.fetch_add(1, Ordering::SeqCst) + 1;

		async move {
			if call < 3 { Err(Error::Upstream("database busy".into())) } else { Ok(Some(vec![1, 2, 3])) }
		}
	};

	let served = guard
		.serve("/api/analysis-history", "203.0.113.9", "history:all", None, &policy, fetch)
		.await
		.expect("served");

	assert_eq!(served, Some(vec![1, 2, 3]));
	assert_eq!(calls.load(Ordering::SeqCst), 3);

	let cached = guard
		.serve("/api/analysis-history", "203.0.113.9", "history:all", None, &policy, fetch)
		.await
		.expect("cached");

	assert_eq!(cached, Some(vec![1, 2, 3]));
	assert_eq!(calls.load(Ordering::SeqCst), 3);

	guard
		.serve("/api/analysis-history", "203.0.113.9", "history:all", None, &policy, fetch)
		.await
		.expect("third admitted");

	let err = guard
		.serve("/api/analysis-history", "203.0.113.9", "history:all", None, &policy, fetch)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::RateLimited { scope: LimitScope::Endpoint, .. }));
	assert_eq!(err.kind(), ErrorKind::Transient);

	guard.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn guard_does_not_retry_input_errors() {
	init_tracing();

	let guard: Guard<String> = Guard::start(GuardConfig::default()).expect("guard");
	let calls = AtomicU32::new(0);
	let policy = RetryPolicy::database_write();
	let err = guard
		.serve("/classificar_solucao", "192.0.2.1", "classification:42", None, &policy, || {
			calls.fetch_add(1, Ordering::SeqCst);

			async { Err(Error::Validation { field: "solution_id", reason: "Unknown id.".into() }) }
		})
		.await
		.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::Input);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert!(guard.cache().is_empty().await);

	guard.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn fallback_replaces_exhausted_transient_failures() {
	init_tracing();

	let calls = AtomicU32::new(0);
	let policy = RetryPolicy::api_request();
	let result = RetryExecutor::new(&policy)
		.named("analysis")
		.with_fallback(String::from("analysis unavailable"))
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);

			async { Err::<String, _>(Error::Timeout { operation: "analysis".into(), after: Duration::from_secs(3) }) }
		})
		.await;

	assert_eq!(result.expect("fallback"), "analysis unavailable");
	assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts);
}
