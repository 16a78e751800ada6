//! Vigil Agent - host telemetry collector and tail viewer
//!
//! Runs on each monitored machine and reports to the Vigil kernel:
//! - Periodic host samples (CPU score, memory, disk, network hints)
//! - Batched uploads with a size threshold and a flush deadline
//! - Independent latency probes
//!
//! `vigil-agent watch [host]` polls the kernel instead and prints a live
//! summary of the recent tail for one host.

mod client;
mod config;
mod metrics;
mod uploader;
mod viewer;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::KernelClient;
use config::AgentConfig;
use metrics::{Collector, NetworkHints};
use uploader::Session;

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Watch(Option<String>),
    Hosts,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command> {
    let mut args = args.into_iter();
    match args.next().as_deref() {
        None | Some("run") => Ok(Command::Run),
        Some("watch") => Ok(Command::Watch(args.next())),
        Some("hosts") => Ok(Command::Hosts),
        Some(other) => bail!("unknown command '{other}' (expected run, watch [host] or hosts)"),
    }
}

async fn run_session(config: &AgentConfig, client: KernelClient) -> Result<()> {
    if !config.has_identity() {
        warn!("no user or session id configured, the kernel will reject every batch");
    }

    let sampling = &config.sampling;
    let collector = Collector::new(sampling.cpu_budget()).with_hints(NetworkHints {
        downlink_mbps: sampling.downlink_mbps,
        rtt_ms: sampling.rtt_ms,
    });
    let session = Session::new(config.agent.host.clone(), Arc::new(client), collector, config.schedule());

    let stats = session
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;
    info!(
        samples = stats.samples_collected,
        batches = stats.batches_dispatched,
        pings = stats.pings_started,
        abandoned = stats.submissions_abandoned,
        "session summary"
    );
    Ok(())
}

async fn list_hosts(client: &KernelClient) -> Result<()> {
    let hosts = client.hosts().await.context("Failed to list hosts")?;
    if hosts.is_empty() {
        info!("no hosts reported yet");
    }
    for host in hosts {
        println!("{host}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil_agent=info")))
        .init();

    let command = parse_args(std::env::args().skip(1))?;
    let config = AgentConfig::load().await.context("Failed to load agent config")?;
    let client = KernelClient::from_config(&config).context("Failed to build kernel client")?;

    info!(
        version = %config.agent.version,
        host = %config.agent.host,
        kernel = %config.kernel.url,
        "Vigil agent starting"
    );

    match command {
        Command::Run => run_session(&config, client).await,
        Command::Hosts => list_hosts(&client).await,
        Command::Watch(host) => {
            let host = host.unwrap_or_else(|| config.agent.host.clone());
            let view = &config.viewer;
            tokio::select! {
                res = viewer::watch(
                    &client,
                    &host,
                    Duration::from_secs(view.window_secs),
                    Duration::from_secs(view.refresh_secs.max(1)),
                    view.tail_limit,
                ) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])).unwrap(), Command::Run);
        assert_eq!(parse_args(args(&["run"])).unwrap(), Command::Run);
        assert_eq!(parse_args(args(&["hosts"])).unwrap(), Command::Hosts);
        assert_eq!(parse_args(args(&["watch"])).unwrap(), Command::Watch(None));
        assert_eq!(
            parse_args(args(&["watch", "lab-01"])).unwrap(),
            Command::Watch(Some("lab-01".to_string()))
        );
        assert!(parse_args(args(&["reboot"])).is_err());
    }
}
