//! Background refresh of container stats.
//!
//! A dedicated task sweeps every real-mode Docker service, fetching a
//! fresh stats snapshot for each with bounded concurrency and publishing
//! it into the service's shared cache cell.  The registry lock is held
//! only long enough to snapshot the work list; the fetches themselves
//! run lock-free against the cells.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::StreamExt;
use rorg_docker::{ContainerDriver, StatsCell};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ServiceManager;

/// Poll grain for stop checks and inter-sweep waits.
const STOP_POLL: Duration = Duration::from_millis(250);

/// One unit of work for a sweep: where to fetch and where to publish.
pub struct RefreshJob {
    /// The driver that owns the container.
    pub(crate) driver: Arc<dyn ContainerDriver>,
    /// The container to sample.
    pub(crate) container_name: String,
    /// The cell to publish the snapshot into.
    pub(crate) cell: StatsCell,
}

/// Handle on the background stats-refresh task.
pub struct StatsRefresher {
    /// Set to ask the task to wind down.
    stop: Arc<AtomicBool>,
    /// The task itself, awaited on shutdown.
    handle: JoinHandle<()>,
}

impl StatsRefresher {
    /// Spawn the refresh task.
    ///
    /// The task holds only a weak handle on the registry and exits on
    /// its own if the registry goes away.
    pub fn launch(
        manager: Weak<Mutex<ServiceManager>>,
        concurrency: usize,
        min_gap: Duration,
    ) -> StatsRefresher {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(manager, Arc::clone(&stop), concurrency.max(1), min_gap));
        StatsRefresher { stop, handle }
    }

    /// Ask the task to stop and wait for it to wind down.  In-flight
    /// fetches may be abandoned.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Err(e) = self.handle.await {
            debug!("stats refresher ended abnormally: {}", e);
        }
    }
}

/// The sweep loop.
async fn run(
    manager: Weak<Mutex<ServiceManager>>,
    stop: Arc<AtomicBool>,
    concurrency: usize,
    min_gap: Duration,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let sweep_start = Instant::now();
        let jobs = match manager.upgrade() {
            Some(manager) => manager.lock().await.stats_refresh_jobs(),
            None => {
                debug!("registry gone; stats refresher exiting");
                return;
            }
        };

        let sweep = futures::stream::iter(jobs).for_each_concurrent(concurrency, |job| async move {
            match job.driver.stats(&job.container_name).await {
                Ok(stats) => {
                    job.cell.publish(stats);
                }
                Err(e) => debug!("could not refresh stats for {}: {}", job.container_name, e),
            }
        });
        tokio::select! {
            _ = sweep => debug!("refreshed container stats"),
            _ = wait_for_stop(&stop) => return,
        }

        // Pace the sweeps: never start a new one sooner than `min_gap`
        // after the previous one started.
        while !stop.load(Ordering::Relaxed) && sweep_start.elapsed() < min_gap {
            tokio::time::sleep(STOP_POLL).await;
        }
    }
}

/// Resolve once the stop flag is raised.
async fn wait_for_stop(stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        tokio::time::sleep(STOP_POLL).await;
    }
}
