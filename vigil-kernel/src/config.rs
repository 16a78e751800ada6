use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf};
use tokio::fs;
use tracing::warn;

use crate::service::Limits;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub bind: SocketAddr,
    pub limits: Limits,
    pub store: StoreConf,
    pub health_log_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StoreConf {
    pub journal_path: Option<PathBuf>, // ex: "./data/metrics.jsonl"
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            limits: Limits::default(),
            store: StoreConf::default(),
            health_log_interval_secs: 60,
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("VIGIL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!(path = %path.display(), "no kernel config, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid kernel config, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let cfg = load_config_from(Path::new("/nonexistent/kernel.yaml")).await;
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.limits.max_batch, 25);
        assert_eq!(cfg.limits.hosts_scan, 500);
        assert!(cfg.store.journal_path.is_none());
    }

    #[tokio::test]
    async fn partial_yaml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(
            &path,
            "bind: 127.0.0.1:9000\nlimits:\n  hosts_scan: 50\nstore:\n  journal_path: ./data/m.jsonl\n",
        )
        .unwrap();

        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.bind, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(cfg.limits.hosts_scan, 50);
        assert_eq!(cfg.limits.max_batch, 25);
        assert_eq!(cfg.store.journal_path, Some(PathBuf::from("./data/m.jsonl")));
        assert_eq!(cfg.health_log_interval_secs, 60);
    }

    #[tokio::test]
    async fn invalid_yaml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "bind: [not, an, address]\n").unwrap();
        assert_eq!(load_config_from(&path).await.bind.port(), 8080);
    }
}
