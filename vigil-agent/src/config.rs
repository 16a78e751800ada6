//! Configuration management with secure storage
//!
//! Handles:
//! - Kernel endpoint and ping target
//! - Caller identity (user id / session id) and optional API key (keyring)
//! - Sampling, flush and ping cadences
//! - Persistent host label, so a machine keeps reporting under one name

use anyhow::Result;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::uploader::Schedule;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub kernel: KernelConfig,
    pub identity: IdentityConfig,
    pub sampling: SamplingConfig,
    pub viewer: ViewerConfig,
    pub agent: AgentInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub url: String,
    pub ping_url: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub store_credentials: bool,
    #[serde(skip)] // Never serialize secrets
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub sample_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub batch_threshold: usize,
    pub cpu_budget_ms: u64,
    /// Static link hints for hosts whose OS cannot report them
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window_secs: u64,
    pub refresh_secs: u64,
    pub tail_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub host: String,
    pub version: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            ping_url: None,
            request_timeout_secs: 10,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 2,
            flush_interval_secs: 7,
            ping_interval_secs: 15,
            batch_threshold: 5,
            cpu_budget_ms: 25,
            downlink_mbps: None,
            rtt_ms: None,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { window_secs: 5 * 60, refresh_secs: 5, tail_limit: 400 }
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            host: default_host_label(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Local hostname, or a short random label when it cannot be read
fn default_host_label() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string())
}

impl SamplingConfig {
    pub fn cpu_budget(&self) -> Duration {
        Duration::from_millis(self.cpu_budget_ms)
    }
}

/// Where the kernel API key lives when `store_credentials` is set
pub trait SecretStore {
    fn load(&self) -> Result<String>;
    fn save(&self, secret: &str) -> Result<()>;
}

/// OS keyring entry for the kernel API key
pub struct Keyring;

impl SecretStore for Keyring {
    fn load(&self) -> Result<String> {
        let entry = Entry::new("vigil-agent", "kernel-api-key")?;
        entry.get_password().map_err(Into::into)
    }

    fn save(&self, secret: &str) -> Result<()> {
        let entry = Entry::new("vigil-agent", "kernel-api-key")?;
        entry.set_password(secret).map_err(Into::into)
    }
}

impl AgentConfig {
    /// Load config from OS-specific location, creating it on first run
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        let mut config = Self::load_from(&config_path).await?;
        config.resolve_credentials(&Keyring, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Stored key first, environment on top. With `store_credentials`, a key
    /// that differs from the stored one is written back to `secrets`.
    pub fn resolve_credentials<S, F>(&mut self, secrets: &S, lookup: F)
    where
        S: SecretStore,
        F: Fn(&str) -> Option<String>,
    {
        if self.identity.store_credentials {
            self.identity.api_key = secrets.load().ok();
        }
        let stored = self.identity.api_key.clone();
        self.apply_overrides(lookup);

        if !self.identity.store_credentials {
            return;
        }
        if let Some(key) = self.identity.api_key.as_deref().filter(|k| stored.as_deref() != Some(*k)) {
            match secrets.save(key) {
                Ok(()) => tracing::info!("kernel API key saved to keyring"),
                Err(e) => tracing::warn!(error = %e, "could not save kernel API key"),
            }
        }
    }

    pub fn schedule(&self) -> Schedule {
        let sampling = &self.sampling;
        Schedule {
            sample_every: Duration::from_secs(sampling.sample_interval_secs.max(1)),
            flush_every: Duration::from_secs(sampling.flush_interval_secs.max(1)),
            ping_every: Duration::from_secs(sampling.ping_interval_secs.max(1)),
            batch_threshold: sampling.batch_threshold.max(1),
            drain_timeout: Duration::from_secs(self.kernel.request_timeout_secs.max(1)),
        }
    }

    /// Read `path`; a missing file yields defaults which are saved back so
    /// the generated host label stays stable across runs
    pub async fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(path).await {
                tracing::warn!(path = %path.display(), error = %e, "could not persist default config");
            }
            Ok(config)
        }
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Environment wins over the file: VIGIL_KERNEL_URL, VIGIL_HOST,
    /// VIGIL_USER_ID, VIGIL_SESSION_ID, VIGIL_API_KEY
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("VIGIL_KERNEL_URL") {
            self.kernel.url = url;
        }
        if let Some(host) = get("VIGIL_HOST") {
            self.agent.host = host;
        }
        if let Some(user) = get("VIGIL_USER_ID") {
            self.identity.user_id = Some(user);
        }
        if let Some(session) = get("VIGIL_SESSION_ID") {
            self.identity.session_id = Some(session);
        }
        if let Some(key) = get("VIGIL_API_KEY") {
            self.identity.api_key = Some(key);
        }
    }

    pub fn has_identity(&self) -> bool {
        self.identity.user_id.is_some() || self.identity.session_id.is_some()
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("vigil-agent");
        path.push("config.toml");
        Ok(path)
    }
}
