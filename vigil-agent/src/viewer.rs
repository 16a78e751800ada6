//! Tail view: polls recent samples for one host and summarises them
//!
//! - Online status from the age of the latest sample
//! - Per-metric trend over the last few samples
//! - Byte formatting for memory/disk figures

use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::client::{ClientError, KernelClient};
use crate::metrics::{now_ms, Sample};

/// A host is "online" if it reported within this window
pub const ONLINE_WINDOW_MS: i64 = 10_000;
const TREND_SPAN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub enum Metric {
    CpuScore,
    NetRtt,
    NetPingMs,
}

impl Metric {
    fn read(self, sample: &Sample) -> Option<f64> {
        match self {
            Metric::CpuScore => sample.cpu_score,
            Metric::NetRtt => sample.net_rtt,
            Metric::NetPingMs => sample.net_ping_ms,
        }
    }
}

/// Compare first and last of the most recent samples (ascending input).
/// A missing or zero end reads as flat; fewer than two samples is unknown.
pub fn trend(samples: &[Sample], metric: Metric) -> Trend {
    if samples.len() < 2 {
        return Trend::Unknown;
    }
    let recent = &samples[samples.len().saturating_sub(TREND_SPAN)..];
    let first = recent.first().and_then(|s| metric.read(s));
    let last = recent.last().and_then(|s| metric.read(s));
    match (first, last) {
        (Some(a), Some(b)) if a != 0.0 && b != 0.0 && b > a => Trend::Up,
        (Some(a), Some(b)) if a != 0.0 && b != 0.0 && b < a => Trend::Down,
        _ => Trend::Flat,
    }
}

#[derive(Debug, Serialize)]
pub struct HostSummary {
    pub count: usize,
    pub online: bool,
    pub latest: Option<Sample>,
    pub cpu_trend: Trend,
    pub rtt_trend: Trend,
    pub ping_trend: Trend,
}

impl HostSummary {
    pub fn from_tail(samples: &[Sample], now_ms: i64) -> Self {
        let latest = samples.last().cloned();
        let online = latest
            .as_ref()
            .map(|s| now_ms - s.ts < ONLINE_WINDOW_MS)
            .unwrap_or(false);
        Self {
            count: samples.len(),
            online,
            latest,
            cpu_trend: trend(samples, Metric::CpuScore),
            rtt_trend: trend(samples, Metric::NetRtt),
            ping_trend: trend(samples, Metric::NetPingMs),
        }
    }
}

/// Human readable byte count (B, KB, MB, GB; two decimals max)
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes <= 0.0 {
        return "0 B".to_string();
    }
    let (mut value, mut exp) = (bytes, 0);
    while value >= 1024.0 && exp < UNITS.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }
    format!("{} {}", (value * 100.0).round() / 100.0, UNITS[exp])
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "--".to_string())
}

/// Poll the tail of `host` until interrupted.
///
/// An identity rejection ends the watch: it means the session has no valid
/// owner, not a transient failure. Other errors are logged and the next poll
/// proceeds.
pub async fn watch(client: &KernelClient, host: &str, window: Duration, refresh: Duration, limit: usize) -> Result<()> {
    let mut ticker = interval(refresh);
    loop {
        ticker.tick().await;
        let since = now_ms() - window.as_millis() as i64;
        match client.tail(host, since, limit).await {
            Ok(samples) => {
                let summary = HostSummary::from_tail(&samples, now_ms());
                let latest = summary.latest.as_ref();
                let status = if summary.online { "ONLINE" } else { "OFFLINE" };
                let cpu = or_dash(latest.and_then(|s| s.cpu_score).map(|v| format!("{v:.0}")));
                let cores = or_dash(latest.and_then(|s| s.cpu_cores).map(|v| format!("{v:.0}")));
                let mem = or_dash(latest.and_then(|s| s.mem_total).map(format_bytes));
                let rtt = or_dash(latest.and_then(|s| s.net_rtt).map(|v| v.to_string()));
                let ping = or_dash(latest.and_then(|s| s.net_ping_ms).map(|v| format!("{v:.0}")));
                info!(
                    host,
                    status,
                    samples = summary.count,
                    %cpu,
                    %cores,
                    %mem,
                    rtt_ms = %rtt,
                    ping_ms = %ping,
                    cpu_trend = ?summary.cpu_trend,
                    rtt_trend = ?summary.rtt_trend,
                    ping_trend = ?summary.ping_trend,
                    "tail"
                );
            }
            Err(ClientError::Unauthenticated) => bail!("kernel rejected identity, stopping watch"),
            Err(e) => warn!(host, error = %e, "tail query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_cpu(ts: i64, cpu: Option<f64>) -> Sample {
        let mut s = Sample::at(ts);
        s.cpu_score = cpu;
        s
    }

    #[test]
    fn test_trend_needs_two_samples() {
        assert_eq!(trend(&[], Metric::CpuScore), Trend::Unknown);
        assert_eq!(trend(&[with_cpu(1, Some(10.0))], Metric::CpuScore), Trend::Unknown);
    }

    #[test]
    fn test_trend_uses_last_five() {
        let samples: Vec<Sample> = [900.0, 100.0, 200.0, 150.0, 120.0, 300.0]
            .iter()
            .enumerate()
            .map(|(i, v)| with_cpu(i as i64, Some(*v)))
            .collect();
        // window is 100..300, the leading 900 is ignored
        assert_eq!(trend(&samples, Metric::CpuScore), Trend::Up);

        let down = vec![with_cpu(1, Some(5.0)), with_cpu(2, Some(3.0))];
        assert_eq!(trend(&down, Metric::CpuScore), Trend::Down);

        let flat = vec![with_cpu(1, Some(5.0)), with_cpu(2, Some(5.0))];
        assert_eq!(trend(&flat, Metric::CpuScore), Trend::Flat);
    }

    #[test]
    fn test_trend_flat_when_an_end_is_missing_or_zero() {
        let samples = vec![with_cpu(1, Some(5.0)), with_cpu(2, None)];
        assert_eq!(trend(&samples, Metric::CpuScore), Trend::Flat);
        assert_eq!(trend(&samples, Metric::NetPingMs), Trend::Flat);

        let zero_start = vec![with_cpu(1, Some(0.0)), with_cpu(2, Some(7.0))];
        assert_eq!(trend(&zero_start, Metric::CpuScore), Trend::Flat);
    }

    #[test]
    fn test_summary_online_window() {
        let samples = vec![with_cpu(1_000, Some(1.0)), with_cpu(20_000, Some(2.0))];
        let summary = HostSummary::from_tail(&samples, 25_000);
        assert!(summary.online);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.latest.unwrap().ts, 20_000);
        assert_eq!(summary.cpu_trend, Trend::Up);

        assert!(!HostSummary::from_tail(&samples, 30_000).online);
        assert!(!HostSummary::from_tail(&[], 30_000).online);
    }

    #[tokio::test]
    async fn test_watch_stops_on_unauthenticated() {
        let mut config = crate::config::AgentConfig::default();
        config.kernel.url = crate::client::stub::spawn().await;
        let anonymous = KernelClient::from_config(&config).unwrap();

        let res = tokio::time::timeout(
            Duration::from_secs(5),
            watch(&anonymous, "desk", Duration::from_secs(300), Duration::from_secs(1), 400),
        )
        .await
        .expect("watch should end on its own");
        assert!(res.is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(8.0 * 1024.0 * 1024.0 * 1024.0), "8 GB");
        assert_eq!(format_bytes(3.0 * 1024f64.powi(4)), "3072 GB");
    }
}
