//! Host sample collection for Vigil agents
//!
//! Produces one best-effort [`Sample`] per call:
//! - CPU score from a fixed-duration busy loop
//! - Logical core count, memory and disk usage via sysinfo
//! - Network hints (downlink, RTT) when the platform exposes them
//!
//! Collection never fails. Anything that cannot be measured is left `None`,
//! which the kernel stores as "not measured", never as zero.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tracing::trace;

/// One observation of this host (wire shape shared with the kernel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_downlink: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_rtt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_ping_ms: Option<f64>,
}

impl Sample {
    /// Sample carrying only a timestamp
    pub fn at(ts: i64) -> Self {
        Self {
            ts,
            cpu_score: None,
            cpu_cores: None,
            mem_used: None,
            mem_total: None,
            disk_used: None,
            disk_total: None,
            net_downlink: None,
            net_rtt: None,
            net_ping_ms: None,
        }
    }

    /// Single-metric sample produced by the ping probe
    pub fn ping(ts: i64, rtt: Duration) -> Self {
        let mut sample = Self::at(ts);
        sample.net_ping_ms = Some(rtt.as_micros() as f64 / 1000.0);
        sample
    }
}

/// Current wall clock in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Connection hints some platforms expose (e.g. mobile network APIs).
/// Native hosts usually have none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkHints {
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// Anything able to produce a sample on each tick
pub trait Sampler: Send {
    fn sample(&mut self) -> Sample;
}

/// sysinfo-backed collector
pub struct Collector {
    sys: System,
    disks: Disks,
    cpu_budget: Duration,
    hints: NetworkHints,
}

impl Collector {
    pub fn new(cpu_budget: Duration) -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new(),
            cpu_budget,
            hints: NetworkHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: NetworkHints) -> Self {
        self.hints = hints;
        self
    }

    /// Collect one sample. Blocks for at most the CPU budget plus a few syscalls.
    pub fn collect(&mut self) -> Sample {
        let mut sample = Sample::at(now_ms());

        sample.cpu_score = Some(cpu_score(self.cpu_budget) as f64);

        self.sys.refresh_cpu();
        let cores = self.sys.cpus().len();
        if cores > 0 {
            sample.cpu_cores = Some(cores as f64);
        }

        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total > 0 {
            sample.mem_total = Some(total as f64);
            sample.mem_used = Some(self.sys.used_memory() as f64);
        }

        if let Some((used, total)) = self.disk_usage() {
            sample.disk_used = Some(used as f64);
            sample.disk_total = Some(total as f64);
        }

        sample.net_downlink = self.hints.downlink_mbps;
        sample.net_rtt = self.hints.rtt_ms;

        trace!(?sample, "sample collected");
        sample
    }

    /// (used, total) bytes summed over distinct mounted disks
    fn disk_usage(&mut self) -> Option<(u64, u64)> {
        self.disks.refresh_list();
        let mut seen = HashSet::new();
        let (mut used, mut total) = (0u64, 0u64);
        for disk in self.disks.list() {
            // same device mounted more than once
            if !seen.insert(disk.name().to_os_string()) {
                continue;
            }
            total = total.saturating_add(disk.total_space());
            used = used.saturating_add(disk.total_space().saturating_sub(disk.available_space()));
        }
        (total > 0).then_some((used, total))
    }
}

impl Sampler for Collector {
    fn sample(&mut self) -> Sample {
        self.collect()
    }
}

/// Count busy-loop iterations achieved within `budget`.
///
/// The result is a relative score only: it depends on clock speed, load and
/// build profile, and must not be compared across machines.
pub fn cpu_score(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut ops: u64 = 0;
    while start.elapsed() < budget {
        ops = std::hint::black_box(ops.wrapping_add(1));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_collection() {
        let mut collector = Collector::new(Duration::from_millis(5));
        let before = now_ms();
        let sample = collector.collect();

        assert!(sample.ts >= before);
        assert!(sample.cpu_score.unwrap() > 0.0);
        assert!(sample.cpu_cores.unwrap_or(1.0) >= 1.0);
        if let (Some(used), Some(total)) = (sample.mem_used, sample.mem_total) {
            assert!(used <= total);
        }
        assert_eq!(sample.net_ping_ms, None);
        // no hints on a native host
        assert_eq!(sample.net_downlink, None);
        assert_eq!(sample.net_rtt, None);
    }

    #[test]
    fn test_hints_are_forwarded() {
        let mut collector = Collector::new(Duration::from_millis(1)).with_hints(NetworkHints {
            downlink_mbps: Some(9.5),
            rtt_ms: None,
        });
        let sample = collector.collect();
        assert_eq!(sample.net_downlink, Some(9.5));
        assert_eq!(sample.net_rtt, None);
    }

    #[test]
    fn test_cpu_score_respects_budget() {
        let start = Instant::now();
        let ops = cpu_score(Duration::from_millis(10));
        let elapsed = start.elapsed();
        assert!(ops > 0);
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_ping_sample_has_only_ping() {
        let sample = Sample::ping(1_000, Duration::from_micros(12_500));
        assert_eq!(sample.net_ping_ms, Some(12.5));
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json, serde_json::json!({"ts": 1000, "netPingMs": 12.5}));
    }
}
