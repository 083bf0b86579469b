//! Reads the database password from a running pod's environment.

use tracing::{debug, info};

use super::errors::{KubeError, Result};
use super::kubectl::Kubectl;

/// Env var tried when the configured one is empty or unset.
pub const FALLBACK_PASSWORD_VAR: &str = "PGPASSWORD";

/// Default env var holding the password in Postgres images.
pub const DEFAULT_PASSWORD_VAR: &str = "POSTGRES_PASSWORD";

/// Discovers credentials with `kubectl exec ... -- printenv`.
pub struct CredentialDiscoverer<'a> {
    kubectl: &'a dyn Kubectl,
}

impl<'a> CredentialDiscoverer<'a> {
    pub fn new(kubectl: &'a dyn Kubectl) -> Self {
        Self { kubectl }
    }

    /// Tries `var_name`, then [`FALLBACK_PASSWORD_VAR`]; first non-empty value wins.
    pub async fn discover(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        var_name: &str,
    ) -> Result<String> {
        let candidates = candidate_vars(var_name);

        for var in &candidates {
            match self.read_env(namespace, pod, container, var).await {
                Ok(value) if !value.is_empty() => {
                    info!(pod = %pod, var = %var, "Discovered password from pod environment");
                    return Ok(value);
                }
                Ok(_) => debug!(pod = %pod, var = %var, "Env var is empty"),
                Err(e) => debug!(pod = %pod, var = %var, error = %e, "Env var not readable"),
            }
        }

        Err(KubeError::CredentialNotFound {
            vars: candidates.join(" or "),
            pod: pod.to_string(),
        })
    }

    async fn read_env(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        var: &str,
    ) -> Result<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
        ];
        if let Some(container) = container.filter(|c| !c.is_empty()) {
            args.push("-c".to_string());
            args.push(container.to_string());
        }
        args.extend(["--", "printenv", var].map(String::from));

        self.kubectl.run(&args).await
    }
}

fn candidate_vars(var_name: &str) -> Vec<String> {
    let mut vars = Vec::with_capacity(2);
    if !var_name.is_empty() {
        vars.push(var_name.to_string());
    }
    if var_name != FALLBACK_PASSWORD_VAR {
        vars.push(FALLBACK_PASSWORD_VAR.to_string());
    }
    vars
}
