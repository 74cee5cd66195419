//! Validation of targets and proxies before any packet is sent
//!
//! Each computer kind has an ordered strategy chain. The general strategy runs
//! first for every kind. The first failing strategy decides the result.
//! Network trouble during a check becomes a failed result, never an error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::{Computer, ComputerKind, ValidationResult};
use crate::remote::{ChannelProvider, ReachabilityProbe};
use crate::wol::{is_valid_computer_name, MacAddress};

pub const MSG_EMPTY_NAME: &str = "Computer name cannot be empty.";
pub const MSG_TARGET_ONLINE: &str = "Target computer is already online.";
pub const MSG_PROXY_UNREACHABLE: &str = "Proxy computer is not reachable.";
pub const MSG_PROXY_NO_REMOTING: &str = "Proxy computer does not expose the remote execution endpoint.";

/// One rule in a validation chain.
#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(&self, computer: &Computer) -> ValidationResult;
}

/// Name must be non-empty and a host name or IP literal.
#[derive(Debug, Default)]
pub struct GeneralStrategy;

#[async_trait]
impl ValidationStrategy for GeneralStrategy {
    fn name(&self) -> &'static str {
        "general"
    }

    async fn validate(&self, computer: &Computer) -> ValidationResult {
        let name = computer.name();
        if name.trim().is_empty() {
            return ValidationResult::failure(MSG_EMPTY_NAME);
        }
        if !is_valid_computer_name(name) {
            return ValidationResult::failure(format!(
                "Computer name '{name}' is not a valid host name or IP address."
            ));
        }
        ValidationResult::success()
    }
}

/// MAC must parse, and the target must not already answer.
pub struct TargetStrategy {
    probe: Arc<dyn ReachabilityProbe>,
    probe_timeout: Duration,
}

impl TargetStrategy {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, probe_timeout: Duration) -> Self {
        Self { probe, probe_timeout }
    }
}

#[async_trait]
impl ValidationStrategy for TargetStrategy {
    fn name(&self) -> &'static str {
        "target"
    }

    async fn validate(&self, computer: &Computer) -> ValidationResult {
        let Computer::Target(target) = computer else {
            return ValidationResult::failure("Target validation applied to a non-target computer.");
        };

        if target.mac_address.parse::<MacAddress>().is_err() {
            return ValidationResult::failure(format!(
                "Invalid MAC address format: '{}'.",
                target.mac_address
            ));
        }

        match self.probe.probe(&target.info.name, self.probe_timeout).await {
            Ok(true) => ValidationResult::failure(MSG_TARGET_ONLINE),
            Ok(false) => ValidationResult::success(),
            Err(e) => ValidationResult::failure(format!("Reachability check failed: {e}")),
        }
    }
}

/// Proxy must answer, and expose remote execution when a provider is set.
pub struct ProxyStrategy {
    probe: Arc<dyn ReachabilityProbe>,
    probe_timeout: Duration,
    provider: Option<Arc<dyn ChannelProvider>>,
}

impl ProxyStrategy {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        probe_timeout: Duration,
        provider: Option<Arc<dyn ChannelProvider>>,
    ) -> Self {
        Self {
            probe,
            probe_timeout,
            provider,
        }
    }
}

#[async_trait]
impl ValidationStrategy for ProxyStrategy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn validate(&self, computer: &Computer) -> ValidationResult {
        let Computer::Proxy(proxy) = computer else {
            return ValidationResult::failure("Proxy validation applied to a non-proxy computer.");
        };

        match self.probe.probe(&proxy.info.name, self.probe_timeout).await {
            Ok(true) => {}
            Ok(false) => return ValidationResult::failure(MSG_PROXY_UNREACHABLE),
            Err(e) => return ValidationResult::failure(format!("Reachability check failed: {e}")),
        }

        if let Some(provider) = &self.provider {
            match provider.supports_remote_execution(&proxy.info.name).await {
                Ok(true) => {}
                Ok(false) => return ValidationResult::failure(MSG_PROXY_NO_REMOTING),
                Err(e) => {
                    return ValidationResult::failure(format!("Remote execution check failed: {e}"))
                }
            }
        }
        ValidationResult::success()
    }
}

/// Runs the strategy chain registered for a computer's kind.
#[derive(Default)]
pub struct ValidationEngine {
    chains: HashMap<ComputerKind, Vec<Arc<dyn ValidationStrategy>>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// General + target chain for targets, general + proxy chain for proxies.
    pub fn standard(
        probe: Arc<dyn ReachabilityProbe>,
        probe_timeout: Duration,
        provider: Option<Arc<dyn ChannelProvider>>,
    ) -> Self {
        let general: Arc<dyn ValidationStrategy> = Arc::new(GeneralStrategy);
        Self::new()
            .with_chain(
                ComputerKind::Target,
                vec![
                    general.clone(),
                    Arc::new(TargetStrategy::new(probe.clone(), probe_timeout)),
                ],
            )
            .with_chain(
                ComputerKind::Proxy,
                vec![general, Arc::new(ProxyStrategy::new(probe, probe_timeout, provider))],
            )
    }

    pub fn with_chain(mut self, kind: ComputerKind, chain: Vec<Arc<dyn ValidationStrategy>>) -> Self {
        self.chains.insert(kind, chain);
        self
    }

    pub async fn validate(&self, computer: &Computer) -> ValidationResult {
        let Some(chain) = self.chains.get(&computer.kind()) else {
            return ValidationResult::success();
        };
        for strategy in chain {
            let result = strategy.validate(computer).await;
            if !result.is_valid {
                debug!(
                    "{} failed {} validation: {}",
                    computer.name(),
                    strategy.name(),
                    result.message
                );
                return result;
            }
        }
        ValidationResult::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe {
        online: HashSet<&'static str>,
        broken: HashSet<&'static str>,
    }

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
            if self.broken.contains(host) {
                return Err(ProbeError::Failed {
                    host: host.into(),
                    reason: "socket permission denied".into(),
                });
            }
            Ok(self.online.contains(host))
        }
    }

    struct Recording {
        verdict: ValidationResult,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ValidationStrategy for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn validate(&self, _computer: &Computer) -> ValidationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn engine(online: &[&'static str], broken: &[&'static str]) -> ValidationEngine {
        let probe = Arc::new(FixedProbe {
            online: online.iter().copied().collect(),
            broken: broken.iter().copied().collect(),
        });
        ValidationEngine::standard(probe, Duration::from_millis(50), None)
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let first = Arc::new(Recording {
            verdict: ValidationResult::failure("first says no"),
            calls: AtomicUsize::new(0),
        });
        let second = Arc::new(Recording {
            verdict: ValidationResult::success(),
            calls: AtomicUsize::new(0),
        });
        let engine = ValidationEngine::new()
            .with_chain(ComputerKind::Target, vec![first.clone(), second.clone()]);

        let result = engine.validate(&Computer::target("T1", "00:11:22:33:44:55")).await;
        assert_eq!(result, ValidationResult::failure("first says no"));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_target_rules() {
        let engine = engine(&["awake"], &[]);

        let ok = engine.validate(&Computer::target("T1", "00:11:22:33:44:55")).await;
        assert!(ok.is_valid);

        let bad_mac = engine.validate(&Computer::target("T1", "00:11:22")).await;
        assert!(!bad_mac.is_valid);
        assert!(bad_mac.message.contains("Invalid MAC address"));

        let online = engine.validate(&Computer::target("awake", "00:11:22:33:44:55")).await;
        assert_eq!(online.message, MSG_TARGET_ONLINE);

        let empty = engine.validate(&Computer::target("", "00:11:22:33:44:55")).await;
        assert_eq!(empty.message, MSG_EMPTY_NAME);

        let bad_name = engine.validate(&Computer::target("bad name", "00:11:22:33:44:55")).await;
        assert!(bad_name.message.contains("not a valid host name"));
    }

    #[tokio::test]
    async fn test_proxy_rules() {
        let engine = engine(&["P1"], &["P3"]);

        assert!(engine.validate(&Computer::proxy("P1", 9)).await.is_valid);
        assert_eq!(
            engine.validate(&Computer::proxy("P2", 9)).await.message,
            MSG_PROXY_UNREACHABLE
        );

        let broken = engine.validate(&Computer::proxy("P3", 9)).await;
        assert!(!broken.is_valid);
        assert!(broken.message.contains("socket permission denied"));
    }
}
