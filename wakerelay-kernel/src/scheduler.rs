//! Bounded fan-out of queued units of work
//!
//! A unit is a zero-argument async closure. `run_all` drains the queue and
//! runs up to `max_concurrency` units at once. A unit that fails or panics is
//! logged and counted; it never stops its siblings.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::WakeError;

pub type UnitOfWork = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), WakeError>> + Send>;

/// Outcome counts of one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Never started because cancellation came first.
    pub skipped: usize,
}

pub struct RequestScheduler {
    max_concurrency: usize,
    queue: Mutex<VecDeque<UnitOfWork>>,
}

impl RequestScheduler {
    pub fn new(max_concurrency: usize) -> Result<Self, WakeError> {
        if max_concurrency == 0 {
            return Err(WakeError::InvalidArgument(
                "scheduler max_concurrency must be positive".into(),
            ));
        }
        Ok(Self {
            max_concurrency,
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn schedule<F, Fut>(&self, unit: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), WakeError>> + Send + 'static,
    {
        self.queue
            .lock()
            .push_back(Box::new(move || Box::pin(unit()) as BoxFuture<'static, _>));
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drops every queued unit without running it.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    /// Runs everything queued so far and returns once all units finished.
    ///
    /// Units still waiting for a slot when `cancel` fires are skipped. Running
    /// units keep going and see the token at their own suspension points.
    pub async fn run_all(&self, cancel: &CancellationToken) -> RunSummary {
        let units: Vec<UnitOfWork> = self.queue.lock().drain(..).collect();
        let mut summary = RunSummary::default();
        if units.is_empty() {
            return summary;
        }
        debug!("running {} unit(s), {} at a time", units.len(), self.max_concurrency);

        let slots = Arc::new(Semaphore::new(self.max_concurrency));
        let mut running = JoinSet::new();
        for unit in units {
            let slots = slots.clone();
            let cancel = cancel.clone();
            running.spawn(async move {
                let _slot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    slot = slots.acquire_owned() => slot.ok()?,
                };
                if cancel.is_cancelled() {
                    return None;
                }
                Some(unit().await)
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(Some(Ok(()))) => summary.completed += 1,
                Ok(Some(Err(e))) => {
                    warn!("scheduled unit failed: {}", e);
                    summary.failed += 1;
                }
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    error!("scheduled unit panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}
