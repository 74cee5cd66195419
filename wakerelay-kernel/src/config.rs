use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{error, warn};

use crate::error::WakeError;
use crate::models::{Credentials, MAX_TIMEOUT_SECONDS};
use crate::script::ScriptFlavor;

pub const CONFIG_ENV: &str = "WAKERELAY_CONFIG";
pub const PASSWORD_ENV: &str = "WAKERELAY_PASSWORD";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub defaults: WakeDefaults,
    pub pool: PoolConf,
    pub scheduler: SchedulerConf,
    pub monitor: MonitorConf,
    pub transport: TransportConf,
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
}

/// Values used for every option a wake call leaves unset.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WakeDefaults {
    pub port: u16,
    pub max_ping_attempts: u32,
    pub timeout_seconds: u64,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConf {
    pub min_size: usize,
    pub max_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConf {
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConf {
    pub poll_interval_ms: u64,
    pub max_concurrent_pings: usize,
    pub probe_timeout_ms: u64,
    /// How long completed entries are kept past their deadline.
    pub retention_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConf {
    /// Command template; `{login}`, `{proxy}` and `{user}` are substituted.
    pub command: String,
    pub flavor: ScriptFlavor,
    pub capability_port: u16,
    pub exec_timeout_secs: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub listen: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for WakeDefaults {
    fn default() -> Self {
        Self {
            port: 9,
            max_ping_attempts: 5,
            timeout_seconds: 300,
            credentials: None,
        }
    }
}

impl Default for PoolConf {
    fn default() -> Self {
        Self { min_size: 1, max_size: 5 }
    }
}

impl Default for SchedulerConf {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            max_concurrent_pings: 5,
            probe_timeout_ms: 1_000,
            retention_secs: 3_600,
        }
    }
}

impl Default for TransportConf {
    fn default() -> Self {
        Self {
            command: "ssh -o BatchMode=yes {login} pwsh -NoProfile -NonInteractive -Command -".into(),
            flavor: ScriptFlavor::PowerShell,
            capability_port: 22,
            exec_timeout_secs: 60,
            connect_timeout_ms: 2_000,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { listen: "0.0.0.0:8080".into() }
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, WakeError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Rejects values the kernel cannot run with.
    pub fn validate(&self) -> Result<(), WakeError> {
        if self.defaults.port == 0 {
            return Err(WakeError::Config("defaults.port must be positive".into()));
        }
        if self.defaults.max_ping_attempts == 0 {
            return Err(WakeError::Config("defaults.max_ping_attempts must be positive".into()));
        }
        if self.defaults.timeout_seconds == 0 || self.defaults.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(WakeError::Config(format!(
                "defaults.timeout_seconds must be between 1 and {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if self.pool.min_size == 0 || self.pool.min_size > self.pool.max_size {
            return Err(WakeError::Config(format!(
                "pool sizes must satisfy 1 <= min_size <= max_size (got {}..{})",
                self.pool.min_size, self.pool.max_size
            )));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(WakeError::Config("scheduler.max_concurrency must be positive".into()));
        }
        if self.monitor.max_concurrent_pings == 0 {
            return Err(WakeError::Config("monitor.max_concurrent_pings must be positive".into()));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(WakeError::Config("monitor.poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Picks the proxy password up from the environment, never from YAML.
    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            let creds = self.defaults.credentials.get_or_insert_with(Credentials::default);
            creds.password = Some(password);
        }
    }
}

/// Loads the kernel configuration; falls back to defaults when the file is
/// missing or invalid.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "wakerelay.yaml".into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_env();
    cfg
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("no {} found, using default configuration", path.display());
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            error!("cannot read {}: {}", path.display(), e);
            return KernelConfig::default();
        }
    };
    KernelConfig::from_yaml(&txt).unwrap_or_else(|e| {
        error!("invalid configuration {}: {}", path.display(), e);
        KernelConfig::default()
    })
}

/// Per-call overrides; unset fields fall back to `WakeDefaults`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeOptions {
    pub port: Option<u16>,
    pub credentials: Option<Credentials>,
    pub max_ping_attempts: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Fully-resolved options of one wake call.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub max_ping_attempts: u32,
    pub timeout_seconds: u64,
}

impl WakeOptions {
    pub fn resolve(&self, defaults: &WakeDefaults) -> EffectiveOptions {
        EffectiveOptions {
            port: self.port.unwrap_or(defaults.port),
            credentials: merge_credentials(self.credentials.as_ref(), defaults.credentials.as_ref()),
            max_ping_attempts: self.max_ping_attempts.unwrap_or(defaults.max_ping_attempts),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        }
    }
}

/// Field-wise: a caller giving only a username keeps the default password.
fn merge_credentials(call: Option<&Credentials>, defaults: Option<&Credentials>) -> Option<Credentials> {
    match (call, defaults) {
        (Some(call), Some(defaults)) => Some(Credentials {
            username: call.username.clone().or_else(|| defaults.username.clone()),
            password: call.password.clone().or_else(|| defaults.password.clone()),
        }),
        (call, defaults) => call.or(defaults).cloned(),
    }
}
