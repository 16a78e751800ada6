use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::task;
use tracing::info;

use crate::store::{MetricStore, StoreInfo};

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub started_at: String,
    pub batches_accepted: u64,
    pub batches_rejected: u64,
    pub samples_inserted: u64,
    pub samples_stored: u64,
    pub store: StoreInfo,
    pub memory_usage_mb: f32,
}

#[derive(Default)]
struct Counters {
    batches_accepted: AtomicU64,
    batches_rejected: AtomicU64,
    samples_inserted: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    started_at: OffsetDateTime,
    counters: Arc<Counters>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn record_accepted(&self, inserted: usize) {
        self.counters.batches_accepted.fetch_add(1, Ordering::Relaxed);
        self.counters.samples_inserted.fetch_add(inserted as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.counters.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, store: &dyn MetricStore) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            started_at: self.started_at.format(&Rfc3339).unwrap_or_default(),
            batches_accepted: self.counters.batches_accepted.load(Ordering::Relaxed),
            batches_rejected: self.counters.batches_rejected.load(Ordering::Relaxed),
            samples_inserted: self.counters.samples_inserted.load(Ordering::Relaxed),
            samples_stored: store.len() as u64,
            store: store.info(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }

    /// Démarre le log périodique du health kernel
    pub fn spawn_health_logger(&self, store: Arc<dyn MetricStore>, every: Duration) {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // premier tick immédiat, on saute

            loop {
                interval.tick().await;
                let health = health_tracker.get_health(store.as_ref());
                info!(
                    uptime = health.uptime_seconds,
                    accepted = health.batches_accepted,
                    rejected = health.batches_rejected,
                    stored = health.samples_stored,
                    rss_mb = health.memory_usage_mb,
                    "kernel health"
                );
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return (kb as f32) / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }

    // Fallback approximatif
    12.0
}
