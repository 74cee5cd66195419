//! Per-proxy pipeline: validate, open the pool, register monitors, send.
//!
//! Everything that goes wrong here ends up as result records. Nothing is
//! returned to the scheduler, so one proxy never affects another.

use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, WakeError};
use crate::models::{Computer, Credentials, MonitorEntry, TargetSpec, WakeOnLanRequest};
use crate::monitor::MonitorCache;
use crate::pool::ConnectionPoolManager;
use crate::remote::RemoteExecutor;
use crate::results::ResultManager;
use crate::script::MagicPacketScriptBuilder;
use crate::validation::ValidationEngine;
use crate::wol::MacAddress;

pub const MSG_WAKE_CANCELLED: &str = "Wake request cancelled.";

/// Everything one proxy's unit of work needs.
#[derive(Debug, Clone)]
pub struct ProxyBatch {
    pub proxy_name: String,
    pub targets: Vec<TargetSpec>,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub pool_min_size: usize,
    pub pool_max_size: usize,
    pub max_ping_attempts: u32,
    pub timeout_seconds: u64,
}

pub struct ProxyRequestProcessor {
    validator: Arc<ValidationEngine>,
    pools: Arc<ConnectionPoolManager>,
    executor: Arc<dyn RemoteExecutor>,
    scripts: MagicPacketScriptBuilder,
    results: Arc<ResultManager>,
    monitors: Arc<MonitorCache>,
}

impl ProxyRequestProcessor {
    pub fn new(
        validator: Arc<ValidationEngine>,
        pools: Arc<ConnectionPoolManager>,
        executor: Arc<dyn RemoteExecutor>,
        scripts: MagicPacketScriptBuilder,
        results: Arc<ResultManager>,
        monitors: Arc<MonitorCache>,
    ) -> Self {
        Self {
            validator,
            pools,
            executor,
            scripts,
            results,
            monitors,
        }
    }

    pub async fn process_proxy_requests(&self, batch: ProxyBatch, cancel: &CancellationToken) {
        let proxy_name = batch.proxy_name.trim();
        if proxy_name.is_empty() {
            warn!("ignoring batch of {} target(s) with no proxy name", batch.targets.len());
            return;
        }

        let proxy = Computer::proxy(proxy_name, batch.port);
        let verdict = self.validator.validate(&proxy).await;
        if !verdict.is_valid {
            info!("proxy {} rejected: {}", proxy_name, verdict.message);
            self.results
                .add_failure_results(proxy_name, &batch.targets, batch.port, &verdict.message);
            return;
        }

        let channel = match self
            .pools
            .get_or_create_pool(
                proxy_name,
                batch.credentials.as_ref(),
                batch.pool_min_size,
                batch.pool_max_size,
            )
            .await
        {
            Ok(channel) if channel.is_open() => channel,
            Ok(_) => {
                let err = WakeError::PoolNotOpen { proxy: proxy_name.to_string() };
                self.results
                    .add_failure_results(proxy_name, &batch.targets, batch.port, &err.to_string());
                return;
            }
            Err(e) => {
                warn!("no execution pool for {}: {}", proxy_name, e);
                self.results
                    .add_failure_results(proxy_name, &batch.targets, batch.port, &e.to_string());
                return;
            }
        };

        let mut requests: Vec<WakeOnLanRequest> = Vec::with_capacity(batch.targets.len());
        let mut accepted: Vec<(TargetSpec, OffsetDateTime)> = Vec::with_capacity(batch.targets.len());
        for target in &batch.targets {
            let verdict = self.validator.validate(&Computer::target(&target.name, &target.mac)).await;
            if !verdict.is_valid {
                debug!("target {} rejected: {}", target.name, verdict.message);
                self.results.add_failure_results(
                    proxy_name,
                    std::slice::from_ref(target),
                    batch.port,
                    &verdict.message,
                );
                continue;
            }
            let mac: MacAddress = match target.mac.parse() {
                Ok(mac) => mac,
                Err(e) => {
                    self.results.add_failure_results(
                        proxy_name,
                        std::slice::from_ref(target),
                        batch.port,
                        &format!("Invalid MAC address format: {e}"),
                    );
                    continue;
                }
            };

            // Registered before the send so monitoring always sees the target.
            let entry = MonitorEntry::pending(
                &target.name,
                proxy_name,
                batch.max_ping_attempts,
                batch.timeout_seconds,
            );
            let sent_at = entry.wol_sent_at;
            self.monitors.add_or_update(&target.name, entry);
            accepted.push((target.clone(), sent_at));

            requests.push(WakeOnLanRequest {
                target_name: target.name.clone(),
                mac,
                port: batch.port,
                proxy_name: proxy_name.to_string(),
                channel: channel.clone(),
                created_at: OffsetDateTime::now_utc(),
            });
        }

        if requests.is_empty() {
            debug!("nothing left to send through {}", proxy_name);
            return;
        }

        let packets: Vec<(MacAddress, u16)> = requests.iter().map(|r| (r.mac, r.port)).collect();
        let script = self.scripts.build(&packets);

        let sent = if cancel.is_cancelled() {
            Err(RemoteError::Cancelled)
        } else {
            tokio::select! {
                r = self.executor.execute(channel.as_ref(), &script) => r,
                _ = cancel.cancelled() => Err(RemoteError::Cancelled),
            }
        };

        match sent {
            Ok(_) => {
                self.results.add_success_results(&requests);
                info!("sent {} magic packet(s) through {}", requests.len(), proxy_name);
            }
            Err(e) => {
                let message = match e {
                    RemoteError::Cancelled => MSG_WAKE_CANCELLED.to_string(),
                    other => other.to_string(),
                };
                warn!("send through {} failed: {}", proxy_name, message);
                for (target, sent_at) in &accepted {
                    self.monitors.remove_registration(&target.name, *sent_at);
                }
                let targets: Vec<TargetSpec> = accepted.into_iter().map(|(t, _)| t).collect();
                self.results
                    .add_failure_results(proxy_name, &targets, batch.port, &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::remote::{ChannelProvider, ExecutionChannel, PoolSize, ReachabilityProbe, ScriptOutput};
    use crate::script::ScriptFlavor;
    use crate::validation::MSG_PROXY_UNREACHABLE;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct LoopbackChannel {
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExecutionChannel for LoopbackChannel {
        fn proxy_name(&self) -> &str {
            "P1"
        }
        fn is_open(&self) -> bool {
            true
        }
        async fn invoke(&self, script: &str) -> Result<ScriptOutput, RemoteError> {
            self.scripts.lock().push(script.to_string());
            Ok(ScriptOutput::default())
        }
        async fn close(&self) {}
    }

    struct LoopbackProvider(Arc<LoopbackChannel>);

    #[async_trait]
    impl ChannelProvider for LoopbackProvider {
        async fn open(
            &self,
            _proxy_name: &str,
            _credentials: Option<&Credentials>,
            _size: PoolSize,
        ) -> Result<Arc<dyn ExecutionChannel>, RemoteError> {
            Ok(self.0.clone())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl RemoteExecutor for FailingExecutor {
        async fn execute(
            &self,
            _channel: &dyn ExecutionChannel,
            _script: &str,
        ) -> Result<ScriptOutput, RemoteError> {
            Err(RemoteError::Script { errors: vec!["Access is denied".into()] })
        }
    }

    /// Only "P1" answers.
    struct ProxyOnlyProbe;

    #[async_trait]
    impl ReachabilityProbe for ProxyOnlyProbe {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
            Ok(host == "P1")
        }
    }

    struct Fixture {
        processor: ProxyRequestProcessor,
        channel: Arc<LoopbackChannel>,
        results: Arc<ResultManager>,
        monitors: Arc<MonitorCache>,
    }

    fn fixture(executor: Arc<dyn RemoteExecutor>) -> Fixture {
        let channel = Arc::new(LoopbackChannel::default());
        let results = Arc::new(ResultManager::new());
        let monitors = Arc::new(MonitorCache::new());
        let validator = Arc::new(ValidationEngine::standard(
            Arc::new(ProxyOnlyProbe),
            Duration::from_millis(10),
            None,
        ));
        let pools = Arc::new(ConnectionPoolManager::new(Arc::new(LoopbackProvider(channel.clone()))));
        let processor = ProxyRequestProcessor::new(
            validator,
            pools,
            executor,
            MagicPacketScriptBuilder::new(ScriptFlavor::PowerShell),
            results.clone(),
            monitors.clone(),
        );
        Fixture {
            processor,
            channel,
            results,
            monitors,
        }
    }

    fn batch(proxy: &str, targets: &[(&str, &str)]) -> ProxyBatch {
        ProxyBatch {
            proxy_name: proxy.to_string(),
            targets: targets.iter().map(|(n, m)| TargetSpec::new(*n, *m)).collect(),
            port: 9,
            credentials: None,
            pool_min_size: 1,
            pool_max_size: 2,
            max_ping_attempts: 3,
            timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_invalid_mac_does_not_block_valid_target() {
        let f = fixture(Arc::new(crate::remote::ChannelExecutor));
        f.processor
            .process_proxy_requests(
                batch("P1", &[("T1", "00:11:22:33:44:55"), ("T2", "not-a-mac")]),
                &CancellationToken::new(),
            )
            .await;

        let t1 = f.results.get("T1", "00:11:22:33:44:55").unwrap();
        assert!(t1.request_sent);
        assert!(!t1.success);

        let t2 = f.results.get("T2", "not-a-mac").unwrap();
        assert!(!t2.request_sent);
        assert!(t2.error_message.unwrap().contains("Invalid MAC address"));

        assert!(f.monitors.get("T1").is_some());
        assert!(f.monitors.get("T2").is_none());

        let scripts = f.channel.scripts.lock();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("00:11:22:33:44:55"));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_fails_every_target() {
        let f = fixture(Arc::new(crate::remote::ChannelExecutor));
        f.processor
            .process_proxy_requests(
                batch("P9", &[("T1", "00:11:22:33:44:55"), ("T2", "00:11:22:33:44:66")]),
                &CancellationToken::new(),
            )
            .await;

        let all = f.results.get_all_results();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .all(|r| r.error_message.as_deref() == Some(MSG_PROXY_UNREACHABLE) && !r.request_sent));
        assert!(f.monitors.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_records_batch_and_drops_monitors() {
        let f = fixture(Arc::new(FailingExecutor));
        f.processor
            .process_proxy_requests(batch("P1", &[("T1", "00:11:22:33:44:55")]), &CancellationToken::new())
            .await;

        let t1 = f.results.get("T1", "00:11:22:33:44:55").unwrap();
        assert!(!t1.request_sent);
        assert!(t1.error_message.unwrap().contains("Access is denied"));
        assert!(f.monitors.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let f = fixture(Arc::new(crate::remote::ChannelExecutor));
        let cancel = CancellationToken::new();
        cancel.cancel();
        f.processor
            .process_proxy_requests(batch("P1", &[("T1", "00:11:22:33:44:55")]), &cancel)
            .await;

        let t1 = f.results.get("T1", "00:11:22:33:44:55").unwrap();
        assert_eq!(t1.error_message.as_deref(), Some(MSG_WAKE_CANCELLED));
        assert!(f.channel.scripts.lock().is_empty());
        assert!(f.monitors.is_empty());
    }

    #[tokio::test]
    async fn test_empty_proxy_name_is_a_no_op() {
        let f = fixture(Arc::new(crate::remote::ChannelExecutor));
        f.processor
            .process_proxy_requests(batch("  ", &[("T1", "00:11:22:33:44:55")]), &CancellationToken::new())
            .await;
        assert!(f.results.is_empty());
        assert!(f.monitors.is_empty());
    }
}
