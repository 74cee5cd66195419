use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::models::{MonitorCompletion, TargetSpec, WakeOnLanRequest, WakeOnLanReturn};
use crate::monitor::CompletionSink;
use crate::wol::normalize_mac;

/// Outcome store, one record per `"{target}:{mac}"` key (last write wins).
#[derive(Default)]
pub struct ResultManager {
    results: DashMap<String, WakeOnLanReturn>,
}

pub fn result_key(target_name: &str, mac: &str) -> String {
    format!("{}:{}", target_name, normalize_mac(mac))
}

impl ResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records sent requests: `request_sent = true`, success still unknown.
    pub fn add_success_results(&self, requests: &[WakeOnLanRequest]) {
        let now = OffsetDateTime::now_utc();
        for req in requests {
            let mac = req.mac.to_string();
            let record = WakeOnLanReturn {
                target_name: req.target_name.clone(),
                target_mac: mac.clone(),
                proxy_name: req.proxy_name.clone(),
                port: req.port,
                timestamp: now,
                request_sent: true,
                success: false,
                error_message: None,
            };
            self.results.insert(result_key(&req.target_name, &mac), record);
        }
    }

    pub fn add_failure_results(&self, proxy_name: &str, targets: &[TargetSpec], port: u16, message: &str) {
        let now = OffsetDateTime::now_utc();
        for target in targets {
            let record = WakeOnLanReturn {
                target_name: target.name.clone(),
                target_mac: normalize_mac(&target.mac),
                proxy_name: proxy_name.to_string(),
                port,
                timestamp: now,
                request_sent: false,
                success: false,
                error_message: Some(message.to_string()),
            };
            self.results.insert(result_key(&target.name, &target.mac), record);
        }
        debug!("{} failure result(s) for proxy {}: {}", targets.len(), proxy_name, message);
    }

    /// Applies a monitoring verdict to the record of `target_name`.
    ///
    /// Monitoring only knows the name, so the record is found by key prefix
    /// `"{target_name}:"`. When several MACs share the name, the smallest key
    /// is updated and the others are left alone.
    pub fn update_monitoring_result(&self, target_name: &str, success: bool, error_message: Option<String>) -> bool {
        let prefix = format!("{target_name}:");
        let key = self
            .results
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .min();

        let Some(key) = key else {
            warn!("no result record for monitored target {}", target_name);
            return false;
        };

        match self.results.get_mut(&key) {
            Some(mut record) => {
                record.success = success;
                record.error_message = error_message;
                record.timestamp = OffsetDateTime::now_utc();
                true
            }
            // Removed between lookup and update
            None => false,
        }
    }

    pub fn get(&self, target_name: &str, mac: &str) -> Option<WakeOnLanReturn> {
        self.results.get(&result_key(target_name, mac)).map(|r| r.clone())
    }

    /// Snapshot ordered by key.
    pub fn get_all_results(&self) -> Vec<WakeOnLanReturn> {
        let mut entries: Vec<(String, WakeOnLanReturn)> = self
            .results
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear_results(&self) {
        self.results.clear();
    }
}

impl CompletionSink for ResultManager {
    fn on_completed(&self, completion: &MonitorCompletion) {
        self.update_monitoring_result(
            &completion.target_name,
            completion.success,
            completion.error_message.clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(list: &[(&str, &str)]) -> Vec<TargetSpec> {
        list.iter().map(|(n, m)| TargetSpec::new(*n, *m)).collect()
    }

    #[test]
    fn test_last_write_wins_per_key() {
        let results = ResultManager::new();
        results.add_failure_results("P1", &targets(&[("T1", "00:11:22:33:44:55")]), 9, "first");
        results.add_failure_results("P1", &targets(&[("T1", "00-11-22-33-44-55")]), 9, "second");

        let all = results.get_all_results();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].error_message.as_deref(), Some("second"));
    }

    #[test]
    fn test_monitoring_update_matches_whole_name() {
        let results = ResultManager::new();
        results.add_failure_results(
            "P1",
            &targets(&[("T1", "00:11:22:33:44:55"), ("T10", "00:11:22:33:44:66")]),
            9,
            "pending",
        );

        assert!(results.update_monitoring_result("T1", true, None));
        let t1 = results.get("T1", "00:11:22:33:44:55").unwrap();
        let t10 = results.get("T10", "00:11:22:33:44:66").unwrap();
        assert!(t1.success);
        assert_eq!(t1.error_message, None);
        assert!(!t10.success);
        assert_eq!(t10.error_message.as_deref(), Some("pending"));

        assert!(!results.update_monitoring_result("ghost", true, None));
    }

    #[test]
    fn test_duplicate_names_update_first_key_only() {
        let results = ResultManager::new();
        results.add_failure_results(
            "P1",
            &targets(&[("T1", "AA:AA:AA:AA:AA:AA"), ("T1", "00:00:00:00:00:01")]),
            9,
            "pending",
        );
        results.update_monitoring_result("T1", false, Some("timed out".into()));

        let low = results.get("T1", "00:00:00:00:00:01").unwrap();
        let high = results.get("T1", "AA:AA:AA:AA:AA:AA").unwrap();
        assert_eq!(low.error_message.as_deref(), Some("timed out"));
        assert_eq!(high.error_message.as_deref(), Some("pending"));
    }

    #[test]
    fn test_snapshot_is_sorted_and_clearable() {
        let results = ResultManager::new();
        results.add_failure_results(
            "P1",
            &targets(&[("b", "00:00:00:00:00:02"), ("a", "00:00:00:00:00:01")]),
            9,
            "x",
        );
        let names: Vec<String> = results.get_all_results().into_iter().map(|r| r.target_name).collect();
        assert_eq!(names, vec!["a", "b"]);

        results.clear_results();
        assert!(results.is_empty());
    }
}
