use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::ReachabilityProbe;
use crate::error::ProbeError;

/// Reachability through the system `ping` binary (one echo request).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPingProbe;

impl SystemPingProbe {
    fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
        if cfg!(target_os = "windows") {
            vec![
                "-n".into(),
                "1".into(),
                "-w".into(),
                timeout.as_millis().max(1).to_string(),
                host.into(),
            ]
        } else {
            // -W only takes whole seconds on Linux
            let secs = timeout.as_secs().max(1);
            vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), host.into()]
        }
    }
}

#[async_trait]
impl ReachabilityProbe for SystemPingProbe {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<bool, ProbeError> {
        let args = Self::ping_args(host, timeout);
        let run = AsyncCommand::new("ping")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        // Grace period on top of ping's own timeout for process startup
        let budget = timeout + Duration::from_millis(500);
        match tokio::time::timeout(budget, run).await {
            Ok(Ok(status)) => {
                debug!("ping {} -> {}", host, status);
                Ok(status.success())
            }
            Ok(Err(e)) => Err(ProbeError::Failed {
                host: host.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(false),
        }
    }
}
