//! Polling loop that confirms targets came online
//!
//! Each cycle scans the pending entries and spawns one poll task per entry.
//! A semaphore bounds how many of them probe at the same time. The loop keeps
//! running after every entry has completed so later registrations are picked
//! up, and only stops on cancellation.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{CompletionSink, MonitorCache};
use crate::config::MonitorConf;
use crate::error::WakeError;
use crate::models::{MonitorCompletion, MonitorEntry};
use crate::remote::ReachabilityProbe;

pub const MSG_MONITOR_TIMEOUT: &str = "Target did not come online before the monitoring deadline.";

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub poll_interval: Duration,
    pub max_concurrent_pings: usize,
    pub probe_timeout: Duration,
    pub retention: Duration,
}

impl From<&MonitorConf> for MonitoringSettings {
    fn from(conf: &MonitorConf) -> Self {
        Self {
            poll_interval: Duration::from_millis(conf.poll_interval_ms),
            max_concurrent_pings: conf.max_concurrent_pings,
            probe_timeout: Duration::from_millis(conf.probe_timeout_ms),
            retention: Duration::from_secs(conf.retention_secs),
        }
    }
}

/// What one scan did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub scanned: usize,
    pub completed: usize,
    /// Poll tasks that panicked.
    pub failed_tasks: usize,
}

#[derive(Clone)]
pub struct MonitoringEngine {
    cache: Arc<MonitorCache>,
    probe: Arc<dyn ReachabilityProbe>,
    sink: Arc<dyn CompletionSink>,
    settings: MonitoringSettings,
    throttle: Arc<Semaphore>,
}

impl MonitoringEngine {
    pub fn new(
        cache: Arc<MonitorCache>,
        probe: Arc<dyn ReachabilityProbe>,
        sink: Arc<dyn CompletionSink>,
        settings: MonitoringSettings,
    ) -> Result<Self, WakeError> {
        if settings.max_concurrent_pings == 0 {
            return Err(WakeError::InvalidArgument(
                "max_concurrent_pings must be positive".into(),
            ));
        }
        Ok(Self {
            throttle: Arc::new(Semaphore::new(settings.max_concurrent_pings)),
            cache,
            probe,
            sink,
            settings,
        })
    }

    pub fn cache(&self) -> &Arc<MonitorCache> {
        &self.cache
    }

    /// Scan, wait, repeat until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "monitoring loop started (interval {:?}, {} concurrent pings)",
            self.settings.poll_interval, self.settings.max_concurrent_pings
        );
        while !cancel.is_cancelled() {
            let stats = self.run_cycle(&cancel).await;
            if stats.scanned > 0 {
                debug!(
                    "monitor cycle: {} scanned, {} completed, {} failed",
                    stats.scanned, stats.completed, stats.failed_tasks
                );
            }
            let pruned = self.prune_expired();
            if pruned > 0 {
                debug!("pruned {} completed monitor entries", pruned);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        info!("monitoring loop stopped");
    }

    /// Drops completed entries older than the retention window.
    pub fn prune_expired(&self) -> usize {
        let window = time::Duration::try_from(self.settings.retention).unwrap_or(time::Duration::MAX);
        let cutoff = OffsetDateTime::now_utc().saturating_sub(window);
        self.cache.prune_completed(cutoff)
    }

    /// Polls every pending entry once and waits for all poll tasks.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleStats {
        let pending = self.cache.pending();
        let mut stats = CycleStats {
            scanned: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return stats;
        }

        let mut tasks = JoinSet::new();
        for entry in pending {
            let engine = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { engine.poll_entry(entry, &cancel).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => stats.completed += 1,
                Ok(false) => {}
                Err(e) if e.is_panic() => {
                    error!("monitor poll task panicked: {}", e);
                    stats.failed_tasks += 1;
                }
                Err(e) => debug!("monitor poll task aborted: {}", e),
            }
        }
        stats
    }

    /// Returns true when this poll moved the entry to a terminal state.
    async fn poll_entry(&self, entry: MonitorEntry, cancel: &CancellationToken) -> bool {
        // Held until the end of the task, including unwinding.
        let _permit = tokio::select! {
            permit = self.throttle.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
            _ = cancel.cancelled() => return false,
        };

        let online = self.wait_for_online(&entry, cancel).await;
        let now = OffsetDateTime::now_utc();

        let mut transitioned = false;
        let updated = self.cache.update_existing(&entry.target_name, |e| {
            // Replaced by a newer registration, or finished elsewhere.
            if e.wol_sent_at != entry.wol_sent_at || e.complete {
                return;
            }
            e.success = online;
            e.complete = online || e.is_past_deadline(now) || e.ping_attempts >= e.max_ping_attempts;
            transitioned = e.complete;
        });

        let Some(updated) = updated else {
            return false;
        };
        if transitioned {
            if updated.success {
                info!("{} is online via {}", updated.target_name, updated.proxy_name);
            } else {
                info!(
                    "{} did not come online after {} attempt(s)",
                    updated.target_name, updated.ping_attempts
                );
            }
            self.sink.on_completed(&MonitorCompletion {
                target_name: updated.target_name.clone(),
                proxy_name: updated.proxy_name.clone(),
                success: updated.success,
                error_message: (!updated.success).then(|| MSG_MONITOR_TIMEOUT.to_string()),
                ping_attempts: updated.ping_attempts,
                completed_at: now,
            });
        }
        transitioned
    }

    /// Probes up to the entry's remaining attempts, spaced evenly over its
    /// timeout. False on exhaustion, deadline or cancellation.
    async fn wait_for_online(&self, entry: &MonitorEntry, cancel: &CancellationToken) -> bool {
        let max_attempts = entry.max_ping_attempts.max(1);
        let spacing = Duration::from_secs(entry.timeout_seconds) / max_attempts;
        let remaining = max_attempts.saturating_sub(entry.ping_attempts);

        for attempt in 1..=remaining {
            if cancel.is_cancelled() {
                return false;
            }
            let budget = match remaining_budget(entry) {
                Some(budget) => budget,
                None => return false,
            };

            self.cache.update_existing(&entry.target_name, |e| {
                if e.wol_sent_at == entry.wol_sent_at {
                    e.ping_attempts += 1;
                }
            });

            let timeout = self.settings.probe_timeout.min(budget);
            let reachable = tokio::select! {
                r = self.probe.is_reachable(&entry.target_name, timeout) => r,
                _ = cancel.cancelled() => return false,
            };
            if reachable {
                return true;
            }
            if attempt == remaining {
                break;
            }

            let pause = match remaining_budget(entry) {
                Some(budget) => spacing.min(budget),
                None => return false,
            };
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        false
    }
}

fn remaining_budget(entry: &MonitorEntry) -> Option<Duration> {
    let left = entry.deadline - OffsetDateTime::now_utc();
    if left <= time::Duration::ZERO {
        return None;
    }
    Duration::try_from(left).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProbe {
        online: bool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency_ms: u64,
    }

    #[async_trait]
    impl ReachabilityProbe for CountingProbe {
        async fn probe(&self, _host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.online)
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl ReachabilityProbe for PanickingProbe {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
            panic!("probe exploded for {host}");
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<MonitorCompletion>>);

    impl CompletionSink for RecordingSink {
        fn on_completed(&self, completion: &MonitorCompletion) {
            self.0.lock().push(completion.clone());
        }
    }

    fn settings(max_pings: usize) -> MonitoringSettings {
        MonitoringSettings {
            poll_interval: Duration::from_millis(20),
            max_concurrent_pings: max_pings,
            probe_timeout: Duration::from_millis(100),
            retention: Duration::from_secs(3600),
        }
    }

    fn engine_with(
        probe: Arc<dyn ReachabilityProbe>,
        max_pings: usize,
    ) -> (MonitoringEngine, Arc<MonitorCache>, Arc<RecordingSink>) {
        let cache = Arc::new(MonitorCache::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = MonitoringEngine::new(cache.clone(), probe, sink.clone(), settings(max_pings)).unwrap();
        (engine, cache, sink)
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let result = MonitoringEngine::new(
            Arc::new(MonitorCache::new()),
            Arc::new(CountingProbe::default()),
            Arc::new(RecordingSink::default()),
            settings(0),
        );
        assert!(matches!(result, Err(WakeError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_throttle_bounds_concurrent_probes() {
        let probe = Arc::new(CountingProbe {
            online: true,
            latency_ms: 30,
            ..Default::default()
        });
        let (engine, cache, sink) = engine_with(probe.clone(), 2);
        for i in 0..7 {
            let name = format!("T{i}");
            cache.add_or_update(&name, MonitorEntry::pending(&name, "P1", 3, 30));
        }

        let stats = engine.run_cycle(&CancellationToken::new()).await;

        assert_eq!(stats.scanned, 7);
        assert_eq!(stats.completed, 7);
        assert!(probe.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(sink.0.lock().len(), 7);
    }

    #[tokio::test]
    async fn test_success_completes_and_stops_probing() {
        let probe = Arc::new(CountingProbe {
            online: true,
            ..Default::default()
        });
        let (engine, cache, sink) = engine_with(probe.clone(), 5);
        cache.add_or_update("T1", MonitorEntry::pending("T1", "P1", 5, 30));

        engine.run_cycle(&CancellationToken::new()).await;
        engine.run_cycle(&CancellationToken::new()).await;

        let entry = cache.get("T1").unwrap();
        assert!(entry.complete && entry.success);
        assert_eq!(entry.ping_attempts, 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        let events = sink.0.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(events[0].error_message, None);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_time_out() {
        let probe = Arc::new(CountingProbe::default());
        let (engine, cache, sink) = engine_with(probe.clone(), 5);
        // 2 attempts over 1s: one probe, a 500ms pause, one probe.
        cache.add_or_update("T1", MonitorEntry::pending("T1", "P1", 2, 1));

        let stats = engine.run_cycle(&CancellationToken::new()).await;

        let entry = cache.get("T1").unwrap();
        assert_eq!(stats.completed, 1);
        assert!(entry.complete);
        assert!(!entry.success);
        assert_eq!(entry.ping_attempts, 2);

        let events = sink.0.lock();
        assert_eq!(events[0].error_message.as_deref(), Some(MSG_MONITOR_TIMEOUT));
    }

    #[tokio::test]
    async fn test_past_deadline_completes_without_probing() {
        let probe = Arc::new(CountingProbe::default());
        let (engine, cache, _sink) = engine_with(probe.clone(), 5);
        let mut entry = MonitorEntry::pending("T1", "P1", 5, 30);
        entry.deadline = entry.wol_sent_at - time::Duration::seconds(1);
        cache.add_or_update("T1", entry);

        engine.run_cycle(&CancellationToken::new()).await;

        let entry = cache.get("T1").unwrap();
        assert!(entry.complete && !entry.success);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_entry_pending() {
        let probe = Arc::new(CountingProbe::default());
        let (engine, cache, sink) = engine_with(probe, 5);
        cache.add_or_update("T1", MonitorEntry::pending("T1", "P1", 5, 300));

        let cancel = CancellationToken::new();
        cancel.cancel();
        engine.run_cycle(&cancel).await;

        assert!(!cache.get("T1").unwrap().complete);
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_prune_expired_respects_retention() {
        let (engine, cache, _sink) = engine_with(Arc::new(CountingProbe::default()), 5);
        let mut done = MonitorEntry::pending("T1", "P1", 1, 1);
        done.complete = true;
        done.deadline -= time::Duration::hours(2);
        cache.add_or_update("T1", done);
        let mut fresh = MonitorEntry::pending("T2", "P1", 1, 1);
        fresh.complete = true;
        cache.add_or_update("T2", fresh);

        assert_eq!(engine.prune_expired(), 1);
        assert!(cache.get("T1").is_none());
        assert!(cache.get("T2").is_some());
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_crash_poll() {
        let probe = Arc::new(CountingProbe {
            online: true,
            ..Default::default()
        });
        let (engine, cache, sink) = engine_with(probe, 5);
        let mut entry = MonitorEntry::pending("T1", "P1", 5, 30);
        entry.timeout_seconds = u64::MAX;
        cache.add_or_update("T1", entry);

        let stats = engine.run_cycle(&CancellationToken::new()).await;

        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.completed, 1);
        assert!(cache.get("T1").unwrap().complete);
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_poll_is_counted_and_loop_survives() {
        let (engine, cache, _sink) = engine_with(Arc::new(PanickingProbe), 5);
        cache.add_or_update("T1", MonitorEntry::pending("T1", "P1", 5, 30));

        let stats = engine.run_cycle(&CancellationToken::new()).await;
        assert_eq!(stats.failed_tasks, 1);

        // The permit went back to the pool.
        assert_eq!(engine.throttle.available_permits(), 5);

        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move { engine.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        loop_handle.await.unwrap();
    }
}
