//! kubectl invocation.
//!
//! Everything the watchdog needs from the cluster goes through the
//! [`Kubectl`] capability so resolution, discovery and tunnelling can be
//! exercised without spawning real processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

use super::errors::{KubeError, Result};

/// Timeout for a single kubectl query.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Well-known install locations checked when kubectl is not on PATH.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl",
    "/usr/local/bin/kubectl",
    "/usr/bin/kubectl",
];

/// A long-running kubectl child (the port-forward).
#[async_trait]
pub trait ForwardProcess: Send {
    /// Exit status if the process has already exited, without blocking.
    fn try_wait(&mut self) -> Result<Option<String>>;

    /// Kills the process and waits for it to exit. Must tolerate an already-exited process.
    async fn terminate(&mut self) -> Result<()>;
}

/// Orchestration CLI capability.
#[async_trait]
pub trait Kubectl: Send + Sync {
    /// Fails with [`KubeError::KubectlNotFound`] if the tool cannot be run.
    fn check_available(&self) -> Result<()>;

    /// Runs a query to completion and returns trimmed stdout.
    async fn run(&self, args: &[String]) -> Result<String>;

    /// Starts a background process without waiting for it.
    fn spawn(&self, args: &[String]) -> Result<Box<dyn ForwardProcess>>;
}

/// [`Kubectl`] backed by the real binary.
#[derive(Debug, Clone)]
pub struct KubectlCli {
    path: Option<PathBuf>,
    timeout: Duration,
}

impl KubectlCli {
    /// Looks kubectl up on PATH, then in the usual install locations.
    pub fn new() -> Self {
        Self {
            path: find_kubectl(),
            timeout: KUBECTL_TIMEOUT,
        }
    }

    /// Uses an explicit binary path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            timeout: KUBECTL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn binary(&self) -> Result<&PathBuf> {
        self.path.as_ref().ok_or(KubeError::KubectlNotFound)
    }
}

impl Default for KubectlCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Kubectl for KubectlCli {
    fn check_available(&self) -> Result<()> {
        self.binary().map(|_| ())
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let kubectl = self.binary()?;
        debug!(args = ?args, "Running kubectl");

        let output = timeout(
            self.timeout,
            Command::new(kubectl)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| KubeError::Timeout(args.first().cloned().unwrap_or_default()))??;

        if !output.status.success() {
            return Err(KubeError::command_failed(args, &output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn spawn(&self, args: &[String]) -> Result<Box<dyn ForwardProcess>> {
        let kubectl = self.binary()?;
        debug!(args = ?args, "Spawning kubectl");

        let child = Command::new(kubectl)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ForwardProcess for ChildProcess {
    fn try_wait(&mut self) -> Result<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    async fn terminate(&mut self) -> Result<()> {
        // kill() fails with InvalidInput once the child has been reaped
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "kubectl already exited");
        }
        self.child.wait().await?;
        Ok(())
    }
}

/// Current kubeconfig cluster name, or empty when it cannot be read.
pub async fn cluster_name(kubectl: &dyn Kubectl) -> String {
    let args = to_args(&[
        "config",
        "view",
        "--minify",
        "-o",
        "jsonpath={.clusters[0].name}",
    ]);
    kubectl.run(&args).await.unwrap_or_default()
}

/// Converts borrowed arguments into the owned form the trait takes.
pub(crate) fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn find_kubectl() -> Option<PathBuf> {
    which::which("kubectl")
        .ok()
        .or_else(|| find_executable(KUBECTL_PATHS))
}

fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    paths
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
