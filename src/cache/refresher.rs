//! Periodic background refresh of stale cache entries.

// crates.io
use tokio::{
	sync::watch,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::{_prelude::*, cache::store::CacheStore};

/// Default period between refresh cycles.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a running background refresher.
///
/// Dropping the handle signals the task to stop once the current cycle finishes; call
/// [`RefreshHandle::shutdown`] to also wait for it.
#[derive(Debug)]
pub struct RefreshHandle {
	stop: watch::Sender<bool>,
	task: JoinHandle<()>,
}
impl RefreshHandle {
	/// Whether the refresher task has exited.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Signal the refresher to stop and wait for the in-flight cycle to complete.
	pub async fn shutdown(self) -> Result<()> {
		let _ = self.stop.send(true);

		self.task.await.map_err(|err| Error::Internal(format!("Refresher task failed: {err}.")))
	}
}

pub(crate) fn spawn<V>(store: CacheStore<V>, period: Duration) -> RefreshHandle
where
	V: Clone + Send + Sync + 'static,
{
	let (stop, mut stopped) = watch::channel(false);
	let task = tokio::spawn(async move {
		let mut ticker = time::interval_at(Instant::now() + period, period);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		tracing::debug!(?period, "background refresher started");

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let report = store.refresh_stale().await;

					if report.refreshed + report.failed > 0 {
						tracing::debug!(
							refreshed = report.refreshed,
							failed = report.failed,
							"background refresh cycle finished"
						);
					}
				},
				// Fires on an explicit stop as well as when the handle is dropped.
				_ = stopped.changed() => break,
			}
		}

		tracing::debug!("background refresher stopped");
	});

	RefreshHandle { stop, task }
}
