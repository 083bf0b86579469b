//! Error types for kubectl-backed operations.

use thiserror::Error;

/// Result type alias for kube operations.
pub type Result<T> = std::result::Result<T, KubeError>;

#[derive(Error, Debug)]
pub enum KubeError {
    /// kubectl is not on PATH.
    #[error("kubectl not found in PATH (required for kube-postgres)")]
    KubectlNotFound,

    /// Resource reference is not `namespace/kind/name`.
    #[error("kube-postgres must be namespace/type/name (e.g. default/svc/postgres): {0}")]
    MalformedReference(String),

    /// Local tunnel port outside 1..=65535.
    #[error("kube-local-port must be between 1 and 65535, got {0}")]
    InvalidLocalPort(i64),

    /// Neither endpoints nor selector led to a pod.
    #[error("no pods found for service {service}")]
    NoBackingInstance { service: String },

    /// Service has no selector and no endpoints.
    #[error("service {service} has no endpoints and no selector")]
    SelectorEmpty { service: String },

    /// None of the candidate env vars is set in the pod.
    #[error("could not find {vars} in pod {pod}")]
    CredentialNotFound { vars: String, pod: String },

    /// Local port never accepted a connection.
    #[error("port {port} did not become ready in time (port-forward may have failed)")]
    TunnelNotReady { port: u16 },

    /// The port-forward process died before the port answered.
    #[error("kubectl port-forward for port {port} exited early ({status})")]
    ForwardExited { port: u16, status: String },

    /// Cancellation was requested while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// kubectl exited non-zero.
    #[error("kubectl {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// kubectl did not finish in time.
    #[error("kubectl {0} timed out")]
    Timeout(String),

    /// Connection URL could not be parsed or rewritten.
    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubeError {
    /// Builds a command failure from kubectl's stderr.
    pub fn command_failed(args: &[String], stderr: &[u8]) -> Self {
        KubeError::CommandFailed {
            command: args.first().cloned().unwrap_or_default(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_uses_verb_and_trims_stderr() {
        let args = vec!["get".to_string(), "endpoints".to_string()];
        let err = KubeError::command_failed(&args, b"Error from server (NotFound)\n");
        match err {
            KubeError::CommandFailed { command, stderr } => {
                assert_eq!(command, "get");
                assert_eq!(stderr, "Error from server (NotFound)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
