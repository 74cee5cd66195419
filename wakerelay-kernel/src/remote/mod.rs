//! Remote execution and reachability capabilities consumed by the kernel
//!
//! The kernel never talks to a transport directly:
//! - `ChannelProvider` opens one pooled `ExecutionChannel` per proxy
//! - `RemoteExecutor` runs a script through a channel
//! - `ReachabilityProbe` answers "does this host respond?"
//!
//! `shell` and `ping` provide the implementations used by the binary.

pub mod ping;
pub mod shell;

use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{ProbeError, RemoteError};
use crate::models::Credentials;

/// What a remote script produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    /// Remote error records, one per line reported by the remote side.
    pub errors: Vec<String>,
    pub exit_code: Option<i32>,
}

/// Pool sizing requested when opening a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub min: usize,
    pub max: usize,
}

/// A pooled remote-execution session to one proxy.
#[async_trait]
pub trait ExecutionChannel: Send + Sync + fmt::Debug {
    fn proxy_name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Runs `script` on the proxy. Transport failures are errors; remote error
    /// records are returned in the output for the executor to judge.
    async fn invoke(&self, script: &str) -> Result<ScriptOutput, RemoteError>;

    /// Releases the channel. Calling it twice is harmless.
    async fn close(&self);
}

/// Opens execution channels.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn open(
        &self,
        proxy_name: &str,
        credentials: Option<&Credentials>,
        size: PoolSize,
    ) -> Result<std::sync::Arc<dyn ExecutionChannel>, RemoteError>;

    /// Whether `proxy_name` exposes the remote execution endpoint this
    /// provider relies on.
    async fn supports_remote_execution(&self, _proxy_name: &str) -> Result<bool, RemoteError> {
        Ok(true)
    }
}

/// Runs scripts through channels.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        channel: &dyn ExecutionChannel,
        script: &str,
    ) -> Result<ScriptOutput, RemoteError>;
}

/// Reachability probe.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probes `host`. `Ok(false)` means "no answer"; `Err` means the probe
    /// itself could not run.
    async fn probe(&self, host: &str, timeout: Duration) -> Result<bool, ProbeError>;

    /// Never fails: internal probe errors count as unreachable.
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool {
        match self.probe(host, timeout).await {
            Ok(reachable) => reachable,
            Err(e) => {
                debug!("probe error treated as unreachable: {}", e);
                false
            }
        }
    }
}

/// Default executor: refuses closed channels and turns remote error records
/// into a single `RemoteError::Script`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelExecutor;

#[async_trait]
impl RemoteExecutor for ChannelExecutor {
    async fn execute(
        &self,
        channel: &dyn ExecutionChannel,
        script: &str,
    ) -> Result<ScriptOutput, RemoteError> {
        if !channel.is_open() {
            return Err(RemoteError::ChannelClosed(channel.proxy_name().to_string()));
        }

        let started = Instant::now();
        let output = channel.invoke(script).await?;
        debug!(
            proxy = channel.proxy_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "remote script finished"
        );

        if !output.errors.is_empty() {
            warn!(
                proxy = channel.proxy_name(),
                count = output.errors.len(),
                "remote script reported errors"
            );
            return Err(RemoteError::Script {
                errors: output.errors,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct StaticChannel {
        open: AtomicBool,
        output: ScriptOutput,
    }

    #[async_trait]
    impl ExecutionChannel for StaticChannel {
        fn proxy_name(&self) -> &str {
            "P1"
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        async fn invoke(&self, _script: &str) -> Result<ScriptOutput, RemoteError> {
            Ok(self.output.clone())
        }
        async fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl ReachabilityProbe for FailingProbe {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<bool, ProbeError> {
            Err(ProbeError::Failed {
                host: host.to_string(),
                reason: "no ping binary".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_executor_aggregates_remote_errors() {
        let channel = StaticChannel {
            open: AtomicBool::new(true),
            output: ScriptOutput {
                stdout: String::new(),
                errors: vec!["first".into(), "second".into()],
                exit_code: Some(1),
            },
        };
        let err = ChannelExecutor.execute(&channel, "noop").await.unwrap_err();
        match err {
            RemoteError::Script { errors } => assert_eq!(errors, vec!["first", "second"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_executor_refuses_closed_channel() {
        let channel = StaticChannel {
            open: AtomicBool::new(true),
            output: ScriptOutput::default(),
        };
        channel.close().await;
        channel.close().await;
        let err = ChannelExecutor.execute(&channel, "noop").await.unwrap_err();
        assert!(matches!(err, RemoteError::ChannelClosed(ref p) if p == "P1"));
    }

    #[tokio::test]
    async fn test_probe_error_is_unreachable() {
        assert!(!FailingProbe.is_reachable("T1", Duration::from_millis(10)).await);
    }
}
