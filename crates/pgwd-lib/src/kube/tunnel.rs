//! `kubectl port-forward` tunnels gated on local port readiness.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::{KubeError, Result};
use super::kubectl::{ForwardProcess, Kubectl};
use super::reference::ResourceReference;

/// Remote Postgres port.
pub const DEFAULT_REMOTE_PORT: u16 = 5432;

/// Checks whether something accepts connections on a local port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, port: u16) -> bool;
}

/// Plain TCP connect to 127.0.0.1; the probe socket is dropped right away.
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    connect_timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpPortProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn probe(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        matches!(
            timeout(self.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

/// How long to wait for the forward to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    /// 40 probes, 250ms apart: roughly ten seconds.
    fn default() -> Self {
        Self {
            max_attempts: 40,
            interval: Duration::from_millis(250),
        }
    }
}

/// Owns the port-forward process for as long as the tunnel is needed.
pub struct TunnelHandle {
    process: Option<Box<dyn ForwardProcess>>,
    local_port: u16,
    probes: u32,
}

impl TunnelHandle {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Number of probes it took for the port to become reachable.
    pub fn probes(&self) -> u32 {
        self.probes
    }

    pub fn is_released(&self) -> bool {
        self.process.is_none()
    }

    /// Kills the forward and waits for it to exit. Later calls are no-ops.
    pub async fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            match process.terminate().await {
                Ok(()) => info!(port = self.local_port, "Port-forward stopped"),
                Err(e) => warn!(port = self.local_port, error = %e, "Failed to stop port-forward"),
            }
        }
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("local_port", &self.local_port)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Starts tunnels and waits for them to accept connections.
pub struct TunnelManager<'a> {
    kubectl: &'a dyn Kubectl,
    probe: &'a dyn PortProbe,
    policy: ReadinessPolicy,
}

impl<'a> TunnelManager<'a> {
    pub fn new(kubectl: &'a dyn Kubectl, probe: &'a dyn PortProbe) -> Self {
        Self {
            kubectl,
            probe,
            policy: ReadinessPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Spawns `kubectl port-forward` and returns once `local_port` answers.
    ///
    /// On timeout or cancellation the process is terminated before the
    /// error is returned.
    pub async fn start(
        &self,
        reference: &ResourceReference,
        local_port: u16,
        remote_port: u16,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle> {
        let args = vec![
            "port-forward".to_string(),
            "-n".to_string(),
            reference.namespace().to_string(),
            reference.resource(),
            format!("{local_port}:{remote_port}"),
            "--address=127.0.0.1".to_string(),
        ];

        info!(
            resource = %reference,
            local_port,
            remote_port,
            "Starting port-forward"
        );
        let mut process = self.kubectl.spawn(&args)?;
        let ready = self
            .wait_ready(process.as_mut(), local_port, cancel)
            .await;
        let mut handle = TunnelHandle {
            process: Some(process),
            local_port,
            probes: 0,
        };

        match ready {
            Ok(probes) => {
                handle.probes = probes;
                info!(local_port, probes, "Port-forward ready");
                Ok(handle)
            }
            Err(e) => {
                handle.release().await;
                Err(e)
            }
        }
    }

    /// Probes until the port answers; a dead forward fails without waiting out the policy.
    async fn wait_ready(
        &self,
        process: &mut dyn ForwardProcess,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<u32> {
        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(KubeError::Cancelled);
            }
            ensure_running(process, port)?;
            if self.probe.probe(port).await {
                // Someone else may own the port while kubectl fails to bind it
                ensure_running(process, port)?;
                return Ok(attempt);
            }
            debug!(port, attempt, "Local port not ready yet");

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(KubeError::Cancelled),
                    _ = tokio::time::sleep(self.policy.interval) => {}
                }
            }
        }

        Err(KubeError::TunnelNotReady { port })
    }
}

fn ensure_running(process: &mut dyn ForwardProcess, port: u16) -> Result<()> {
    match process.try_wait()? {
        Some(status) => {
            warn!(port, status = %status, "Port-forward exited before becoming ready");
            Err(KubeError::ForwardExited { port, status })
        }
        None => Ok(()),
    }
}
