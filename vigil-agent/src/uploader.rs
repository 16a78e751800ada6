//! Batching uploader
//!
//! Decouples the sampling cadence from network cost. One session owns one
//! queue and drives three timers from a single cooperative loop:
//! - sample tick: collect, enqueue, submit when the threshold is reached
//! - flush tick: submit whatever is queued, bounding staleness
//! - ping tick: spawn an independent latency probe
//!
//! Failed submissions are logged and dropped. Nothing is retried or requeued.
//! Submissions already started at shutdown are awaited, bounded by
//! `Schedule::drain_timeout`, never cancelled mid-flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::Submitter;
use crate::metrics::{now_ms, Sample, Sampler};

/// Pending samples, drained as a whole
#[derive(Debug)]
pub struct Batch {
    queue: Vec<Sample>,
    threshold: usize,
}

impl Batch {
    pub fn new(threshold: usize) -> Self {
        Self { queue: Vec::new(), threshold: threshold.max(1) }
    }

    /// Enqueue; returns the full batch once the threshold is reached
    pub fn push(&mut self, sample: Sample) -> Option<Vec<Sample>> {
        self.queue.push(sample);
        if self.queue.len() >= self.threshold {
            Some(std::mem::take(&mut self.queue))
        } else {
            None
        }
    }

    pub fn drain(&mut self) -> Option<Vec<Sample>> {
        if self.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.queue))
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub sample_every: Duration,
    pub flush_every: Duration,
    pub ping_every: Duration,
    pub batch_threshold: usize,
    /// Upper bound on waiting for in-flight submissions at shutdown
    pub drain_timeout: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            sample_every: Duration::from_secs(2),
            flush_every: Duration::from_secs(7),
            ping_every: Duration::from_secs(15),
            batch_threshold: 5,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub samples_collected: u64,
    pub batches_dispatched: u64,
    pub pings_started: u64,
    pub submissions_abandoned: u64,
}

/// One monitoring session for one host label
pub struct Session<S: Submitter, P: Sampler> {
    host: String,
    submitter: Arc<S>,
    sampler: P,
    batch: Batch,
    schedule: Schedule,
    stats: SessionStats,
    in_flight: JoinSet<()>,
}

impl<S: Submitter, P: Sampler> Session<S, P> {
    pub fn new(host: impl Into<String>, submitter: Arc<S>, sampler: P, schedule: Schedule) -> Self {
        Self {
            host: host.into(),
            submitter,
            sampler,
            batch: Batch::new(schedule.batch_threshold),
            schedule,
            stats: SessionStats::default(),
            in_flight: JoinSet::new(),
        }
    }

    /// Run until `shutdown` resolves, then make one best-effort final flush
    pub async fn run<F>(mut self, shutdown: F) -> SessionStats
    where
        F: Future<Output = ()>,
    {
        info!(host = %self.host, "monitoring session started");

        let now = Instant::now();
        let mut sample_timer = interval_at(now + self.schedule.sample_every, self.schedule.sample_every);
        let mut flush_timer = interval_at(now + self.schedule.flush_every, self.schedule.flush_every);
        // first probe right away
        let mut ping_timer = interval(self.schedule.ping_every);
        for timer in [&mut sample_timer, &mut flush_timer, &mut ping_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                _ = sample_timer.tick() => {
                    let sample = self.sampler.sample();
                    self.stats.samples_collected += 1;
                    if let Some(full) = self.batch.push(sample) {
                        self.dispatch(full);
                    }
                }

                _ = flush_timer.tick() => {
                    if let Some(pending) = self.batch.drain() {
                        self.dispatch(pending);
                    }
                }

                _ = ping_timer.tick() => self.spawn_ping(),

                Some(done) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = done {
                        warn!(host = %self.host, error = %e, "submission task failed");
                    }
                }
            }
        }

        debug!(host = %self.host, pending = self.batch.len(), "timers stopped");
        if let Some(rest) = self.batch.drain() {
            let count = rest.len();
            self.stats.batches_dispatched += 1;
            match self.submitter.submit(self.host.clone(), rest).await {
                Ok(_) => debug!(host = %self.host, count, "final batch sent"),
                Err(e) => warn!(host = %self.host, count, error = %e, "final batch dropped"),
            }
        }

        self.drain_in_flight().await;

        info!(host = %self.host, stats = ?self.stats, "monitoring session stopped");
        self.stats
    }

    /// Wait for submissions started before shutdown
    async fn drain_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!(host = %self.host, in_flight = self.in_flight.len(), "waiting for in-flight submissions");
        let in_flight = &mut self.in_flight;
        let drained = timeout(self.schedule.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            let abandoned = self.in_flight.len();
            self.stats.submissions_abandoned += abandoned as u64;
            warn!(host = %self.host, abandoned, "in-flight submissions abandoned at shutdown");
            self.in_flight.abort_all();
        }
    }

    /// Not awaited here; the queue is already empty when this is called
    fn dispatch(&mut self, samples: Vec<Sample>) {
        self.stats.batches_dispatched += 1;
        let fut = self.submitter.submit(self.host.clone(), samples);
        let host = self.host.clone();
        self.in_flight.spawn(async move {
            match fut.await {
                Ok(inserted) => debug!(%host, inserted, "batch sent"),
                Err(e) => warn!(%host, error = %e, "batch dropped"),
            }
        });
    }

    fn spawn_ping(&mut self) {
        self.stats.pings_started += 1;
        let submitter = self.submitter.clone();
        let host = self.host.clone();
        self.in_flight.spawn(async move {
            let rtt = match submitter.ping().await {
                Ok(rtt) => rtt,
                Err(e) => {
                    warn!(%host, error = %e, "ping probe failed");
                    return;
                }
            };
            let sample = Sample::ping(now_ms(), rtt);
            if let Err(e) = submitter.submit(host.clone(), vec![sample]).await {
                warn!(%host, error = %e, "ping sample dropped");
            }
        });
    }
}
