use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::remote::ExecutionChannel;
use crate::wol::MacAddress;

/// Fields shared by every computer variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputerInfo {
    pub name: String,
    pub ip_address: Option<IpAddr>,
    pub subnet: Option<String>,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
}

impl ComputerInfo {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            ip_address: name.parse().ok(),
            name,
            subnet: None,
            is_online: false,
            last_activity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetComputer {
    pub info: ComputerInfo,
    /// Raw MAC as supplied by the caller; parsed during validation.
    pub mac_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyComputer {
    pub info: ComputerInfo,
    pub can_relay: bool,
    pub relay_port: u16,
    pub role: String,
}

/// Closed set of computers the kernel deals with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Computer {
    Target(TargetComputer),
    Proxy(ProxyComputer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputerKind {
    Target,
    Proxy,
}

impl Computer {
    pub fn target(name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Computer::Target(TargetComputer {
            info: ComputerInfo::named(name),
            mac_address: mac_address.into(),
        })
    }

    pub fn proxy(name: impl Into<String>, relay_port: u16) -> Self {
        Computer::Proxy(ProxyComputer {
            info: ComputerInfo::named(name),
            can_relay: true,
            relay_port,
            role: "proxy".to_string(),
        })
    }

    pub fn kind(&self) -> ComputerKind {
        match self {
            Computer::Target(_) => ComputerKind::Target,
            Computer::Proxy(_) => ComputerKind::Proxy,
        }
    }

    pub fn info(&self) -> &ComputerInfo {
        match self {
            Computer::Target(t) => &t.info,
            Computer::Proxy(p) => &p.info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }
}

/// A target as requested by the caller: name plus raw MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub mac: String,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
        }
    }
}

/// Credentials handed to the channel provider.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    #[serde(skip)] // Never serialize passwords
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One validated target ready to be sent through its proxy's channel.
#[derive(Clone)]
pub struct WakeOnLanRequest {
    pub target_name: String,
    pub mac: MacAddress,
    pub port: u16,
    pub proxy_name: String,
    pub channel: Arc<dyn ExecutionChannel>,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for WakeOnLanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeOnLanRequest")
            .field("target_name", &self.target_name)
            .field("mac", &self.mac)
            .field("port", &self.port)
            .field("proxy_name", &self.proxy_name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Longest monitoring window a wake call may ask for (30 days).
pub const MAX_TIMEOUT_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Wake-confirmation progress for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub target_name: String,
    pub proxy_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub wol_sent_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub deadline: OffsetDateTime,
    pub success: bool,
    pub complete: bool,
    pub ping_attempts: u32,
    pub max_ping_attempts: u32,
    pub timeout_seconds: u64,
}

impl MonitorEntry {
    pub fn pending(
        target_name: impl Into<String>,
        proxy_name: impl Into<String>,
        max_ping_attempts: u32,
        timeout_seconds: u64,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let timeout_seconds = timeout_seconds.min(MAX_TIMEOUT_SECONDS);
        let window = i64::try_from(timeout_seconds).unwrap_or(i64::MAX);
        Self {
            target_name: target_name.into(),
            proxy_name: proxy_name.into(),
            wol_sent_at: now,
            deadline: now.saturating_add(time::Duration::seconds(window)),
            success: false,
            complete: false,
            ping_attempts: 0,
            max_ping_attempts,
            timeout_seconds,
        }
    }

    pub fn is_past_deadline(&self, now: OffsetDateTime) -> bool {
        now >= self.deadline
    }
}

/// Outcome record for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeOnLanReturn {
    pub target_name: String,
    pub target_mac: String,
    pub proxy_name: String,
    pub port: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub request_sent: bool,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Verdict of a validation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            message: "Validation passed.".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
        }
    }
}

/// Terminal state of a monitored target, handed to completion sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorCompletion {
    pub target_name: String,
    pub proxy_name: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub ping_attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}
