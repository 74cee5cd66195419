/*!
Mock du transport d'exécution distante

Remplace le transport shell par des canaux en mémoire:
- compte les ouvertures de pool par proxy
- enregistre chaque script envoyé
- simule échecs d'ouverture, erreurs distantes et latence
*/

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wakerelay_kernel::models::Credentials;
use wakerelay_kernel::remote::{ChannelProvider, ExecutionChannel, PoolSize, ScriptOutput};
use wakerelay_kernel::RemoteError;

/// Canal en mémoire qui enregistre les scripts reçus
#[derive(Debug)]
pub struct MockChannel {
    proxy_name: String,
    size: PoolSize,
    open: AtomicBool,
    scripts: Mutex<Vec<String>>,
    remote_errors: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new(proxy_name: &str, size: PoolSize) -> Self {
        Self {
            proxy_name: proxy_name.to_string(),
            size,
            open: AtomicBool::new(true),
            scripts: Mutex::new(Vec::new()),
            remote_errors: Mutex::new(Vec::new()),
        }
    }

    /// Les prochains scripts renverront ces erreurs distantes
    pub fn fail_with(&self, errors: Vec<String>) {
        *self.remote_errors.lock().unwrap() = errors;
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn size(&self) -> PoolSize {
        self.size
    }
}

#[async_trait]
impl ExecutionChannel for MockChannel {
    fn proxy_name(&self) -> &str {
        &self.proxy_name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn invoke(&self, script: &str) -> Result<ScriptOutput, RemoteError> {
        if !self.is_open() {
            return Err(RemoteError::ChannelClosed(self.proxy_name.clone()));
        }
        self.scripts.lock().unwrap().push(script.to_string());
        let errors = self.remote_errors.lock().unwrap().clone();
        Ok(ScriptOutput {
            stdout: String::new(),
            exit_code: Some(if errors.is_empty() { 0 } else { 1 }),
            errors,
        })
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Provider de canaux mock, configurable par proxy
#[derive(Default)]
pub struct MockChannelProvider {
    opens: Mutex<HashMap<String, usize>>,
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    open_failures: Mutex<HashMap<String, String>>,
    send_failures: Mutex<HashMap<String, Vec<String>>>,
    no_remoting: Mutex<HashSet<String>>,
    open_delay: Mutex<Duration>,
}

impl MockChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// L'ouverture du pool pour `proxy` échouera avec `reason`
    pub fn fail_open(&self, proxy: &str, reason: &str) {
        self.open_failures
            .lock()
            .unwrap()
            .insert(proxy.to_string(), reason.to_string());
    }

    /// Les envois via `proxy` renverront ces erreurs distantes
    pub fn fail_sends(&self, proxy: &str, errors: &[&str]) {
        let errors: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        if let Some(channel) = self.channel(proxy) {
            channel.fail_with(errors.clone());
        }
        self.send_failures
            .lock()
            .unwrap()
            .insert(proxy.to_string(), errors);
    }

    /// `proxy` n'expose pas l'endpoint d'exécution distante
    pub fn disable_remoting(&self, proxy: &str) {
        self.no_remoting.lock().unwrap().insert(proxy.to_string());
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self, proxy: &str) -> usize {
        self.opens.lock().unwrap().get(proxy).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }

    pub fn channel(&self, proxy: &str) -> Option<Arc<MockChannel>> {
        self.channels.lock().unwrap().get(proxy).cloned()
    }

    /// Scripts envoyés via `proxy` (vide si jamais ouvert)
    pub fn sent_scripts(&self, proxy: &str) -> Vec<String> {
        self.channel(proxy).map(|c| c.scripts()).unwrap_or_default()
    }
}

#[async_trait]
impl ChannelProvider for MockChannelProvider {
    async fn open(
        &self,
        proxy_name: &str,
        _credentials: Option<&Credentials>,
        size: PoolSize,
    ) -> Result<Arc<dyn ExecutionChannel>, RemoteError> {
        *self
            .opens
            .lock()
            .unwrap()
            .entry(proxy_name.to_string())
            .or_insert(0) += 1;

        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.open_failures.lock().unwrap().get(proxy_name) {
            return Err(RemoteError::ChannelOpen {
                proxy: proxy_name.to_string(),
                reason: reason.clone(),
            });
        }

        let channel = Arc::new(MockChannel::new(proxy_name, size));
        if let Some(errors) = self.send_failures.lock().unwrap().get(proxy_name) {
            channel.fail_with(errors.clone());
        }
        self.channels
            .lock()
            .unwrap()
            .insert(proxy_name.to_string(), channel.clone());
        log::debug!("🔌 mock pool opened for {}", proxy_name);
        Ok(channel)
    }

    async fn supports_remote_execution(&self, proxy_name: &str) -> Result<bool, RemoteError> {
        Ok(!self.no_remoting.lock().unwrap().contains(proxy_name))
    }
}
