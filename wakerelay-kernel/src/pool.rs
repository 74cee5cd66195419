//! Per-proxy execution channel pools
//!
//! At most one channel is opened per proxy name and reused until closed.
//! Concurrent callers for the same proxy share a single open attempt.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{RemoteError, WakeError};
use crate::models::Credentials;
use crate::remote::{ChannelProvider, ExecutionChannel, PoolSize};

type PoolSlot = Arc<OnceCell<Arc<dyn ExecutionChannel>>>;

pub struct ConnectionPoolManager {
    provider: Arc<dyn ChannelProvider>,
    pools: DashMap<String, PoolSlot>,
}

impl ConnectionPoolManager {
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            provider,
            pools: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ChannelProvider> {
        &self.provider
    }

    /// Returns the proxy's pool, opening it on first use.
    ///
    /// An open failure is returned as-is and leaves no pool behind, so a later
    /// call tries again. It is never retried inside this call.
    pub async fn get_or_create_pool(
        &self,
        proxy_name: &str,
        credentials: Option<&Credentials>,
        min_size: usize,
        max_size: usize,
    ) -> Result<Arc<dyn ExecutionChannel>, WakeError> {
        if proxy_name.trim().is_empty() {
            return Err(WakeError::InvalidArgument("proxy name must not be empty".into()));
        }
        if min_size == 0 || min_size > max_size {
            return Err(WakeError::InvalidArgument(format!(
                "pool sizes must satisfy 1 <= min <= max (got {min_size}..{max_size})"
            )));
        }

        // Clone the slot out so the shard lock is not held across the await.
        let slot: PoolSlot = self
            .pools
            .entry(proxy_name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let channel = slot
            .get_or_try_init(|| async {
                debug!("Creating execution pool for {}", proxy_name);
                let size = PoolSize { min: min_size, max: max_size };
                self.provider.open(proxy_name, credentials, size).await
            })
            .await
            .map_err(|e: RemoteError| {
                debug!("Pool creation for {} failed: {}", proxy_name, e);
                WakeError::from(e)
            })?;

        // Closed while the open was in flight: nothing tracks this channel any more.
        let current = self
            .pools
            .get(proxy_name)
            .is_some_and(|cur| Arc::ptr_eq(cur.value(), &slot));
        if !current {
            debug!("Pool for {} was closed during creation", proxy_name);
            channel.close().await;
            return Err(WakeError::PoolNotOpen {
                proxy: proxy_name.to_string(),
            });
        }

        Ok(channel.clone())
    }

    /// Current pool for `proxy_name`, if one was opened.
    pub fn get(&self, proxy_name: &str) -> Option<Arc<dyn ExecutionChannel>> {
        self.pools
            .get(proxy_name)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn is_open(&self, proxy_name: &str) -> bool {
        self.get(proxy_name).is_some_and(|c| c.is_open())
    }

    pub fn pool_count(&self) -> usize {
        self.pools.iter().filter(|slot| slot.get().is_some()).count()
    }

    /// Closes and forgets the proxy's pool. Unknown or already closed proxies
    /// are ignored.
    pub async fn close(&self, proxy_name: &str) {
        if let Some((_, slot)) = self.pools.remove(proxy_name) {
            if let Some(channel) = slot.get() {
                channel.close().await;
                info!("Closed execution pool for {}", proxy_name);
            }
        }
    }

    pub async fn close_all(&self) {
        let names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.close(&name).await;
        }
    }
}
