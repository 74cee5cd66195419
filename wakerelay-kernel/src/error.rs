use std::time::Duration;

/// Errors raised by the orchestration kernel.
///
/// Only contract violations and infrastructure failures surface as `WakeError`.
/// Validation and transport problems met while processing a proxy are turned
/// into result records instead.
#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Execution pool for proxy '{proxy}' is not open.")]
    PoolNotOpen { proxy: String },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failures of the remote execution capability.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to open execution channel to '{proxy}': {reason}")]
    ChannelOpen { proxy: String, reason: String },
    #[error("execution channel to '{0}' is closed")]
    ChannelClosed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote script reported {} error(s): {}", .errors.len(), .errors.join("; "))]
    Script { errors: Vec<String> },
    #[error("remote execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote execution cancelled")]
    Cancelled,
}

/// Internal failure of a reachability probe (not a negative answer).
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("reachability probe failed for {host}: {reason}")]
    Failed { host: String, reason: String },
}

pub type Result<T, E = WakeError> = std::result::Result<T, E>;
