//! Cached host-level resource sampling.
//!
//! Host CPU can only be measured over an interval, so a dedicated
//! thread samples continuously and the RPC path reads whatever the last
//! sample was.  CPU usage is the sum over all cores of each core's busy
//! fraction (so a fully busy 8-core host reads 8.0); memory usage is
//! bytes in use.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{CpuExt, System, SystemExt};
use tracing::debug;

/// Shared slots the sampler thread writes and readers read.
struct Inner {
    /// Latest CPU reading, stored as `f64` bits.
    cpu_bits: AtomicU64,
    /// Latest memory reading, in bytes.
    memory: AtomicU64,
    /// Raised to wind the sampler down.
    stop: AtomicBool,
}

/// Continuously sampled host CPU/memory usage.
pub struct HostStatsCache {
    /// The shared slots.
    inner: Arc<Inner>,
    /// The sampler thread, joined by [`HostStatsCache::stop`].
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HostStatsCache {
    /// Start the sampler thread with the given sample interval.
    pub fn start(sample_interval: Duration) -> Arc<HostStatsCache> {
        let inner = Arc::new(Inner {
            cpu_bits: AtomicU64::new(0),
            memory: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("host-stats".to_owned())
            .spawn(move || sample_loop(&thread_inner, sample_interval))
            .expect("could not spawn host-stats thread");
        Arc::new(HostStatsCache {
            inner,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Latest host CPU usage, in core units summed over all cores.
    pub fn cpu_usage(&self) -> f64 {
        f64::from_bits(self.inner.cpu_bits.load(Ordering::Relaxed))
    }

    /// Latest host memory usage, in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.inner.memory.load(Ordering::Relaxed)
    }

    /// Ask the sampler to stop and wait for it.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        let handle = self
            .thread
            .lock()
            .expect("poisoned host-stats thread slot")
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                debug!("host-stats thread panicked");
            }
        }
    }
}

/// The sampler loop: one CPU+memory reading per interval.
fn sample_loop(inner: &Inner, interval: Duration) {
    let mut system = System::new();
    // Prime the CPU counters; usage is meaningful only between two
    // refreshes.
    system.refresh_cpu();
    while !inner.stop.load(Ordering::Relaxed) {
        let start = Instant::now();
        thread::sleep(interval);
        system.refresh_cpu();
        let cpu: f64 = system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()) / 100.0)
            .sum();
        system.refresh_memory();
        inner.cpu_bits.store(cpu.to_bits(), Ordering::Relaxed);
        inner.memory.store(system.used_memory(), Ordering::Relaxed);
        // Failsafe: if the sleep returned early, pad the iteration so
        // this thread cannot spin.
        if start.elapsed() < interval.mul_f64(0.9) {
            thread::sleep(interval);
        }
    }
}
