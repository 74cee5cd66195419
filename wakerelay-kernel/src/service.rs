//! `WakeOrchestrator`: the entry point front ends talk to
//!
//! One orchestrator owns the long-lived state (pools, results, monitor
//! entries) and the background monitoring loop. It is built once by the host
//! process and shared behind an `Arc`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{KernelConfig, WakeOptions};
use crate::error::WakeError;
use crate::models::{MonitorCompletion, MonitorEntry, TargetSpec, WakeOnLanReturn, MAX_TIMEOUT_SECONDS};
use crate::monitor::{CompletionFanout, MonitorCache, MonitoringEngine, MonitoringSettings};
use crate::pool::ConnectionPoolManager;
use crate::processor::{ProxyBatch, ProxyRequestProcessor};
use crate::remote::{ChannelProvider, ReachabilityProbe, RemoteExecutor};
use crate::results::ResultManager;
use crate::scheduler::RequestScheduler;
use crate::script::MagicPacketScriptBuilder;
use crate::validation::ValidationEngine;

const COMPLETION_BUFFER: usize = 256;

pub struct WakeOrchestrator {
    config: KernelConfig,
    pools: Arc<ConnectionPoolManager>,
    processor: Arc<ProxyRequestProcessor>,
    results: Arc<ResultManager>,
    monitors: Arc<MonitorCache>,
    engine: MonitoringEngine,
    completions: broadcast::Sender<MonitorCompletion>,
    monitoring: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl WakeOrchestrator {
    pub fn new(
        config: KernelConfig,
        provider: Arc<dyn ChannelProvider>,
        executor: Arc<dyn RemoteExecutor>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self, WakeError> {
        config.validate()?;

        let probe_timeout = Duration::from_millis(config.monitor.probe_timeout_ms);
        let validator = Arc::new(ValidationEngine::standard(
            probe.clone(),
            probe_timeout,
            Some(provider.clone()),
        ));
        let pools = Arc::new(ConnectionPoolManager::new(provider));
        let results = Arc::new(ResultManager::new());
        let monitors = Arc::new(MonitorCache::new());

        let (completions, _) = broadcast::channel(COMPLETION_BUFFER);
        // Results first, so a subscriber that reads the snapshot sees the update.
        let sink = CompletionFanout::new()
            .with(results.clone())
            .with(Arc::new(completions.clone()));
        let engine = MonitoringEngine::new(
            monitors.clone(),
            probe,
            Arc::new(sink),
            MonitoringSettings::from(&config.monitor),
        )?;

        let processor = Arc::new(ProxyRequestProcessor::new(
            validator,
            pools.clone(),
            executor,
            MagicPacketScriptBuilder::new(config.transport.flavor),
            results.clone(),
            monitors.clone(),
        ));

        Ok(Self {
            config,
            pools,
            processor,
            results,
            monitors,
            engine,
            completions,
            monitoring: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// Sends magic packets for every proxy group and returns the result
    /// snapshot as soon as the sends are done. Monitoring carries on in the
    /// background and updates the records later.
    pub async fn wake_up_and_monitor(
        &self,
        proxy_to_targets: &BTreeMap<String, Vec<TargetSpec>>,
        options: WakeOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<WakeOnLanReturn>, WakeError> {
        let opts = options.resolve(&self.config.defaults);
        if opts.port == 0 {
            return Err(WakeError::InvalidArgument("port must be positive".into()));
        }
        if opts.max_ping_attempts == 0 {
            return Err(WakeError::InvalidArgument("max_ping_attempts must be positive".into()));
        }
        if opts.timeout_seconds == 0 || opts.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(WakeError::InvalidArgument(format!(
                "timeout_seconds must be between 1 and {MAX_TIMEOUT_SECONDS}"
            )));
        }

        let run_id = Uuid::new_v4();
        let scheduler = RequestScheduler::new(self.config.scheduler.max_concurrency)?;
        info!(%run_id, proxies = proxy_to_targets.len(), port = opts.port, "wake requested");

        for (proxy_name, targets) in proxy_to_targets {
            let batch = ProxyBatch {
                proxy_name: proxy_name.clone(),
                targets: targets.clone(),
                port: opts.port,
                credentials: opts.credentials.clone(),
                pool_min_size: self.config.pool.min_size,
                pool_max_size: self.config.pool.max_size,
                max_ping_attempts: opts.max_ping_attempts,
                timeout_seconds: opts.timeout_seconds,
            };
            let processor = self.processor.clone();
            let results = self.results.clone();
            let cancel = cancel.clone();

            scheduler.schedule(move || async move {
                let fallback = batch.clone();
                // A separate task so a panic stays inside this proxy's unit.
                let unit = tokio::spawn(async move {
                    processor.process_proxy_requests(batch, &cancel).await;
                });
                if let Err(e) = unit.await {
                    error!(%run_id, proxy = %fallback.proxy_name, "proxy unit crashed: {}", e);
                    results.add_failure_results(
                        &fallback.proxy_name,
                        &fallback.targets,
                        fallback.port,
                        &format!("Unexpected error while processing proxy '{}': {}", fallback.proxy_name, e),
                    );
                }
                Ok::<(), WakeError>(())
            });
        }

        let summary = scheduler.run_all(cancel).await;
        info!(
            %run_id,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "wake dispatch finished"
        );

        let snapshot = self.results.get_all_results();
        self.ensure_monitoring(cancel);
        Ok(snapshot)
    }

    /// Starts the monitoring loop unless one is already running.
    fn ensure_monitoring(&self, cancel: &CancellationToken) {
        let mut slot = self.monitoring.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.shutdown.is_cancelled() || cancel.is_cancelled() {
            debug!("monitoring not started, already cancelled");
            return;
        }

        let engine = self.engine.clone();
        let caller = cancel.clone();
        let stop = self.shutdown.child_token();
        *slot = Some(tokio::spawn(async move {
            let run = engine.run(stop.clone());
            tokio::pin!(run);
            tokio::select! {
                _ = &mut run => {}
                _ = caller.cancelled() => {
                    stop.cancel();
                    run.await;
                }
            }
        }));
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn get_all_results(&self) -> Vec<WakeOnLanReturn> {
        self.results.get_all_results()
    }

    pub fn clear_results(&self) {
        self.results.clear_results();
    }

    pub fn get_all_monitor_entries(&self) -> Vec<MonitorEntry> {
        self.monitors.get_all()
    }

    pub fn clear_monitor_entries(&self) {
        self.monitors.clear();
    }

    /// Push-style completion events, one per target reaching a terminal state.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<MonitorCompletion> {
        self.completions.subscribe()
    }

    /// Stops monitoring, waits for the loop and closes every pool.
    pub async fn shutdown(&self) {
        info!("shutting down orchestrator");
        self.shutdown.cancel();
        let handle = self.monitoring.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("monitoring loop ended abnormally: {}", e);
            }
        }
        self.pools.close_all().await;
    }
}
