// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};
// crates.io
use resource_guard::{CacheConfig, CacheStore, Error};
use tokio::time;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn store(config: CacheConfig) -> CacheStore<String> {
	CacheStore::new(config).expect("cache store")
}

#[tokio::test(start_paused = true)]
async fn least_recently_used_entry_is_evicted_at_capacity() {
	init_tracing();

	let store = store(CacheConfig { max_entries: 2, ..CacheConfig::default() });

	store.set("A", "alpha".into(), None).await.expect("set A");
	time::advance(Duration::from_millis(10)).await;
	store.set("B", "beta".into(), None).await.expect("set B");
	time::advance(Duration::from_millis(10)).await;

	assert_eq!(store.get("A").await.as_deref(), Some("alpha"));

	time::advance(Duration::from_millis(10)).await;
	store.set("C", "gamma".into(), None).await.expect("set C");

	assert_eq!(store.len().await, 2);
	assert_eq!(store.get("B").await, None);
	assert_eq!(store.get("A").await.as_deref(), Some("alpha"));
	assert_eq!(store.get("C").await.as_deref(), Some("gamma"));

	let stats = store.stats().await;

	assert_eq!(stats.evictions, 1);
	assert_eq!(stats.size, 2);
}

#[tokio::test(start_paused = true)]
async fn oldest_insert_is_evicted_without_intervening_reads() {
	init_tracing();

	let store = store(CacheConfig { max_entries: 2, ..CacheConfig::default() });

	// Same paused instant for every insert: A and B tie on last access, key order decides.
	store.set("A", "alpha".into(), None).await.expect("set A");
	store.set("B", "beta".into(), None).await.expect("set B");
	store.set("C", "gamma".into(), None).await.expect("set C");

	assert_eq!(store.len().await, 2);
	assert_eq!(store.get("A").await, None);
	assert_eq!(store.get("B").await.as_deref(), Some("beta"));
	assert_eq!(store.get("C").await.as_deref(), Some("gamma"));
	assert_eq!(store.stats().await.evictions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_respect_capacity_and_count_every_read() {
	init_tracing();

	let store = store(CacheConfig { max_entries: 16, ..CacheConfig::default() });
	let tasks: Vec<_> = (0..8)
		.map(|worker| {
			let store = store.clone();

			tokio::spawn(async move {
				for i in 0..50 {
					let key = format!("key-{}", (worker * 50 + i) % 40);

					store.set(key.clone(), format!("w{worker}"), None).await.expect("set");
					store.get(&key).await;
				}
			})
		})
		.collect();

	for task in tasks {
		task.await.expect("writer task");
	}

	let stats = store.stats().await;

	assert!(store.len().await <= 16);
	assert_eq!(stats.total_requests(), 8 * 50);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_removed_on_read() {
	init_tracing();

	let store = store(CacheConfig::default());

	store.set("history", "rows".into(), Some(Duration::from_secs(1))).await.expect("set");
	time::advance(Duration::from_millis(500)).await;

	assert_eq!(store.get("history").await.as_deref(), Some("rows"));

	time::advance(Duration::from_secs(1)).await;

	assert_eq!(store.len().await, 1);
	assert_eq!(store.get("history").await, None);
	assert!(store.is_empty().await);

	let stats = store.stats().await;

	assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn zero_ttl_is_rejected() {
	let store = store(CacheConfig::default());
	let err = store.set("k", "v".into(), Some(Duration::ZERO)).await.unwrap_err();

	assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn background_refresher_renews_stale_entries_until_shutdown() {
	init_tracing();

	let store = store(CacheConfig {
		stale_after: Duration::from_secs(1),
		refresh_interval: Duration::from_secs(5),
		..CacheConfig::default()
	});
	let generation = Arc::new(AtomicU32::new(0));
	let counter = generation.clone();

	store.set("metrics", "v0".into(), None).await.expect("set");
	store
		.register_refresh_function("metrics", move || {
			let next = counter.fetch_add(1, Ordering::SeqCst) + 1;

			async move { Ok(Some(format!("v{next}"))) }
		})
		.await;

	let handle = store.spawn_refresher();

	time::sleep(Duration::from_secs(6)).await;

	assert_eq!(store.get("metrics").await.as_deref(), Some("v1"));

	handle.shutdown().await.expect("shutdown");

	let refreshed = generation.load(Ordering::SeqCst);

	time::sleep(Duration::from_secs(60)).await;

	assert_eq!(generation.load(Ordering::SeqCst), refreshed);
	assert_eq!(store.stats().await.refreshes, u64::from(refreshed));
}

#[tokio::test(start_paused = true)]
async fn get_or_set_only_fetches_on_miss() {
	let store = store(CacheConfig::default());
	let calls = AtomicU32::new(0);

	for _ in 0..3 {
		let value = store
			.get_or_set(
				"classification",
				|| async {
					calls.fetch_add(1, Ordering::SeqCst);

					Ok::<_, Error>(Some("ok".to_owned()))
				},
				None,
			)
			.await
			.expect("get_or_set");

		assert_eq!(value.as_deref(), Some("ok"));
	}

	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
