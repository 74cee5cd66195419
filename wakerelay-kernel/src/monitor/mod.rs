//! Wake confirmation: the monitor cache, the polling engine and the sinks
//! that receive completion events.

pub mod cache;
pub mod engine;

pub use cache::MonitorCache;
pub use engine::{CycleStats, MonitoringEngine, MonitoringSettings, MSG_MONITOR_TIMEOUT};

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::MonitorCompletion;

/// Receives one event per target that reaches a terminal monitoring state.
pub trait CompletionSink: Send + Sync {
    fn on_completed(&self, completion: &MonitorCompletion);
}

/// Push-style subscribers; having none is fine.
impl CompletionSink for broadcast::Sender<MonitorCompletion> {
    fn on_completed(&self, completion: &MonitorCompletion) {
        if self.send(completion.clone()).is_err() {
            trace!("no completion subscribers for {}", completion.target_name);
        }
    }
}

/// Delivers to several sinks in registration order.
#[derive(Default, Clone)]
pub struct CompletionFanout {
    sinks: Vec<Arc<dyn CompletionSink>>,
}

impl CompletionFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl CompletionSink for CompletionFanout {
    fn on_completed(&self, completion: &MonitorCompletion) {
        for sink in &self.sinks {
            sink.on_completed(completion);
        }
    }
}
