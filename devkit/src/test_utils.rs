/*!
Test Harness pour le kernel WakeRelay

Monte un `WakeOrchestrator` complet sur les mocks du devkit:
- config rapide (monitoring toutes les 20ms)
- helpers pour construire les groupes proxy → cibles
- attente active des mises à jour de monitoring
*/

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use wakerelay_kernel::remote::ChannelExecutor;
use wakerelay_kernel::{KernelConfig, TargetSpec, WakeOnLanReturn, WakeOptions, WakeOrchestrator};

use crate::probe_stub::ScriptedProbe;
use crate::remote_stub::MockChannelProvider;

/// Harness de test: orchestrateur + mocks partagés
pub struct TestHarness {
    pub provider: Arc<MockChannelProvider>,
    pub probe: Arc<ScriptedProbe>,
    pub orchestrator: Arc<WakeOrchestrator>,
    pub cancel: CancellationToken,
}

/// Config adaptée aux tests: cycles courts, délais de quelques secondes
pub fn fast_config() -> KernelConfig {
    let mut cfg = KernelConfig::default();
    cfg.defaults.max_ping_attempts = 3;
    cfg.defaults.timeout_seconds = 2;
    cfg.monitor.poll_interval_ms = 20;
    cfg.monitor.probe_timeout_ms = 50;
    cfg.monitor.max_concurrent_pings = 5;
    cfg.scheduler.max_concurrency = 4;
    cfg
}

/// `[("P1", &[("T1", "00:11:22:33:44:55")])]` → map proxy → cibles
pub fn proxy_groups(groups: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, Vec<TargetSpec>> {
    groups
        .iter()
        .map(|(proxy, targets)| {
            let specs = targets.iter().map(|(n, m)| TargetSpec::new(*n, *m)).collect();
            (proxy.to_string(), specs)
        })
        .collect()
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(fast_config())
    }

    pub fn with_config(cfg: KernelConfig) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let provider = Arc::new(MockChannelProvider::new());
        let probe = Arc::new(ScriptedProbe::new());
        // Les proxies de test répondent par défaut
        for proxy in ["P1", "P2", "P3"] {
            probe.set_online(proxy);
        }
        let orchestrator = Arc::new(WakeOrchestrator::new(
            cfg,
            provider.clone(),
            Arc::new(ChannelExecutor),
            probe.clone(),
        )?);

        Ok(Self {
            provider,
            probe,
            orchestrator,
            cancel: CancellationToken::new(),
        })
    }

    pub async fn wake(&self, groups: &[(&str, &[(&str, &str)])]) -> Result<Vec<WakeOnLanReturn>> {
        self.wake_with(groups, WakeOptions::default()).await
    }

    pub async fn wake_with(
        &self,
        groups: &[(&str, &[(&str, &str)])],
        options: WakeOptions,
    ) -> Result<Vec<WakeOnLanReturn>> {
        let results = self
            .orchestrator
            .wake_up_and_monitor(&proxy_groups(groups), options, &self.cancel)
            .await?;
        log::info!("📨 wake returned {} result(s)", results.len());
        Ok(results)
    }

    /// Résultat courant pour `target`
    pub fn result_for(&self, target: &str) -> Option<WakeOnLanReturn> {
        self.orchestrator
            .get_all_results()
            .into_iter()
            .find(|r| r.target_name == target)
    }

    /// Attend que le résultat de `target` satisfasse `pred`
    pub async fn wait_for_result<F>(&self, target: &str, timeout_ms: u64, pred: F) -> Result<WakeOnLanReturn>
    where
        F: Fn(&WakeOnLanReturn) -> bool,
    {
        let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            loop {
                if let Some(result) = self.result_for(target) {
                    if pred(&result) {
                        return result;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        match waited {
            Ok(result) => Ok(result),
            Err(_) => anyhow::bail!(
                "timeout waiting for {} (last: {:?})",
                target,
                self.result_for(target)
            ),
        }
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.orchestrator.shutdown().await;
    }
}
