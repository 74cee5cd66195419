/*!
Probe de joignabilité scriptée

Chaque hôte répond selon le scénario configuré: toujours en ligne, en ligne
après N sondages, ou probe en erreur. Compte les appels et le nombre maximal
de sondages simultanés.
*/

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use wakerelay_kernel::remote::ReachabilityProbe;
use wakerelay_kernel::ProbeError;

#[derive(Default)]
pub struct ScriptedProbe {
    online: Mutex<HashSet<String>>,
    online_after: Mutex<HashMap<String, usize>>,
    broken: Mutex<HashMap<String, String>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, host: &str) {
        self.online.lock().unwrap().insert(host.to_string());
    }

    pub fn set_offline(&self, host: &str) {
        self.online.lock().unwrap().remove(host);
        self.online_after.lock().unwrap().remove(host);
    }

    /// Hors ligne pour les `calls` premiers sondages, en ligne ensuite
    pub fn online_after(&self, host: &str, calls: usize) {
        self.online_after
            .lock()
            .unwrap()
            .insert(host.to_string(), calls);
    }

    /// Le probe lui-même échoue pour `host`
    pub fn break_host(&self, host: &str, reason: &str) {
        self.broken
            .lock()
            .unwrap()
            .insert(host.to_string(), reason.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self, host: &str) -> usize {
        self.calls.lock().unwrap().get(host).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, host: &str, call: usize) -> Result<bool, ProbeError> {
        if let Some(reason) = self.broken.lock().unwrap().get(host) {
            return Err(ProbeError::Failed {
                host: host.to_string(),
                reason: reason.clone(),
            });
        }
        if self.online.lock().unwrap().contains(host) {
            return Ok(true);
        }
        Ok(self
            .online_after
            .lock()
            .unwrap()
            .get(host)
            .is_some_and(|after| call > *after))
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(host.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        log::trace!("probe {} #{}", host, call);
        self.answer(host, call)
    }
}
