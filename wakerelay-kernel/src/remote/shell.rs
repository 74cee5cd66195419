//! Shell transport: each channel runs scripts through a configured command
//! (typically `ssh … pwsh -Command -`) with the script piped on stdin.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command as AsyncCommand;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{ChannelProvider, ExecutionChannel, PoolSize, ScriptOutput};
use crate::config::TransportConf;
use crate::error::{RemoteError, WakeError};
use crate::models::Credentials;
use crate::script::ScriptFlavor;

const READY_MARKER: &str = "wakerelay-ready";

/// Opens `ShellChannel`s from the transport configuration.
#[derive(Debug, Clone)]
pub struct ShellChannelProvider {
    conf: TransportConf,
    template: Vec<String>,
}

impl ShellChannelProvider {
    pub fn new(conf: TransportConf) -> Result<Self, WakeError> {
        let template = shell_words::split(&conf.command)
            .map_err(|e| WakeError::Config(format!("transport command: {e}")))?;
        if template.is_empty() {
            return Err(WakeError::Config("transport command is empty".into()));
        }
        Ok(Self { conf, template })
    }

    /// Substitutes `{proxy}`, `{user}` and `{login}` in every template word.
    /// Names that could be read as a command-line option are refused.
    pub fn render_command(
        &self,
        proxy_name: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>, RemoteError> {
        check_argument_word(proxy_name, "proxy name", proxy_name)?;
        let user = credentials
            .and_then(|c| c.username.as_deref())
            .unwrap_or_default();
        if !user.is_empty() {
            check_argument_word(proxy_name, "username", user)?;
        }
        let login = if user.is_empty() {
            proxy_name.to_string()
        } else {
            format!("{user}@{proxy_name}")
        };
        Ok(self
            .template
            .iter()
            .map(|word| {
                word.replace("{login}", &login)
                    .replace("{proxy}", proxy_name)
                    .replace("{user}", user)
            })
            .collect())
    }

    fn handshake_script(&self) -> String {
        match self.conf.flavor {
            ScriptFlavor::PowerShell => format!("Write-Output '{READY_MARKER}'\n"),
            ScriptFlavor::Python => format!("print('{READY_MARKER}')\n"),
        }
    }
}

#[async_trait]
impl ChannelProvider for ShellChannelProvider {
    async fn open(
        &self,
        proxy_name: &str,
        credentials: Option<&Credentials>,
        size: PoolSize,
    ) -> Result<Arc<dyn ExecutionChannel>, RemoteError> {
        let argv = self.render_command(proxy_name, credentials)?;
        debug!("Opening shell channel to {}: {:?}", proxy_name, argv);

        let channel = ShellChannel {
            proxy_name: proxy_name.to_string(),
            argv,
            permits: Semaphore::new(size.max.max(1)),
            open: AtomicBool::new(true),
            exec_timeout: Duration::from_secs(self.conf.exec_timeout_secs),
        };

        let reason = match channel.invoke(&self.handshake_script()).await {
            Ok(out) if out.errors.is_empty() && out.stdout.contains(READY_MARKER) => None,
            Ok(out) if !out.errors.is_empty() => Some(out.errors.join("; ")),
            Ok(_) => Some("handshake did not answer".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = reason {
            return Err(RemoteError::ChannelOpen {
                proxy: proxy_name.to_string(),
                reason,
            });
        }

        info!(
            "Shell channel to {} ready (min {}, max {})",
            proxy_name, size.min, size.max
        );
        Ok(Arc::new(channel))
    }

    async fn supports_remote_execution(&self, proxy_name: &str) -> Result<bool, RemoteError> {
        let timeout = Duration::from_millis(self.conf.connect_timeout_ms);
        let connect = TcpStream::connect((proxy_name, self.conf.capability_port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                debug!("{}:{} refused: {}", proxy_name, self.conf.capability_port, e);
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }
}

fn check_argument_word(proxy: &str, what: &str, value: &str) -> Result<(), RemoteError> {
    let refused = value.is_empty()
        || value.starts_with('-')
        || value.chars().any(|c| c.is_whitespace() || c.is_control());
    if refused {
        return Err(RemoteError::ChannelOpen {
            proxy: proxy.to_string(),
            reason: format!("invalid {what} '{}'", value.escape_debug()),
        });
    }
    Ok(())
}

/// A proxy session bounded to `max` concurrent invocations.
#[derive(Debug)]
pub struct ShellChannel {
    proxy_name: String,
    argv: Vec<String>,
    permits: Semaphore,
    open: AtomicBool,
    exec_timeout: Duration,
}

#[async_trait]
impl ExecutionChannel for ShellChannel {
    fn proxy_name(&self) -> &str {
        &self.proxy_name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn invoke(&self, script: &str) -> Result<ScriptOutput, RemoteError> {
        if !self.is_open() {
            return Err(RemoteError::ChannelClosed(self.proxy_name.clone()));
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RemoteError::ChannelClosed(self.proxy_name.clone()))?;

        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| RemoteError::Transport("empty command".into()))?;

        let mut child = AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.exec_timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(self.exec_timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut errors: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let exit_code = output.status.code();
        if !output.status.success() && errors.is_empty() {
            errors.push(format!(
                "remote command exited with status {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ));
        }

        Ok(ScriptOutput {
            stdout,
            errors,
            exit_code,
        })
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.permits.close();
            info!("Shell channel to {} closed", self.proxy_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(command: &str) -> TransportConf {
        TransportConf {
            command: command.to_string(),
            ..TransportConf::default()
        }
    }

    #[test]
    fn test_render_command_with_login() {
        let provider = ShellChannelProvider::new(conf("ssh -o BatchMode=yes {login} pwsh -Command -")).unwrap();
        let creds = Credentials {
            username: Some("admin".into()),
            password: None,
        };
        assert_eq!(
            provider.render_command("P1", Some(&creds)).unwrap(),
            vec!["ssh", "-o", "BatchMode=yes", "admin@P1", "pwsh", "-Command", "-"]
        );
        assert_eq!(provider.render_command("P1", None).unwrap()[3], "P1");
    }

    #[test]
    fn test_option_like_login_is_refused() {
        let provider = ShellChannelProvider::new(conf("ssh -o BatchMode=yes {login} pwsh -Command -")).unwrap();
        for username in ["-oProxyCommand=touch /tmp/x", "-oProxyCommand=x", "ad min", "admin\n"] {
            let creds = Credentials {
                username: Some(username.into()),
                password: None,
            };
            assert!(matches!(
                provider.render_command("P1", Some(&creds)),
                Err(RemoteError::ChannelOpen { .. })
            ));
        }
        assert!(provider.render_command("-oProxyCommand=x", None).is_err());
        assert!(provider.render_command("P 1", None).is_err());
    }

    #[tokio::test]
    async fn test_open_refuses_option_like_username() {
        let provider = ShellChannelProvider::new(conf("ssh {login} pwsh -Command -")).unwrap();
        let creds = Credentials {
            username: Some("-oProxyCommand=x".into()),
            password: None,
        };
        let err = provider
            .open("P1", Some(&creds), PoolSize { min: 1, max: 1 })
            .await
            .unwrap_err();
        match err {
            RemoteError::ChannelOpen { proxy, reason } => {
                assert_eq!(proxy, "P1");
                assert!(reason.contains("invalid username"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(ShellChannelProvider::new(conf("   ")), Err(WakeError::Config(_))));
        assert!(matches!(ShellChannelProvider::new(conf("ssh 'unterminated")), Err(WakeError::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_shell_channel_roundtrip() {
        let mut c = conf("sh -s");
        c.flavor = ScriptFlavor::PowerShell;
        let provider = ShellChannelProvider::new(c).unwrap();
        // `Write-Output 'wakerelay-ready'` is not valid sh, so the handshake fails.
        let err = provider
            .open("localhost", None, PoolSize { min: 1, max: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::ChannelOpen { .. }));

        let channel = ShellChannel {
            proxy_name: "localhost".into(),
            argv: vec!["sh".into(), "-s".into()],
            permits: Semaphore::new(1),
            open: AtomicBool::new(true),
            exec_timeout: Duration::from_secs(5),
        };
        let out = channel.invoke("echo hello\necho oops 1>&2\n").await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.errors, vec!["oops"]);

        channel.close().await;
        channel.close().await;
        assert!(matches!(
            channel.invoke("echo hi").await,
            Err(RemoteError::ChannelClosed(_))
        ));
    }
}
