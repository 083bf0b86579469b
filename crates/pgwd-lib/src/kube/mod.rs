//! Kubernetes access through kubectl.
//!
//! This module provides:
//! - `namespace/kind/name` resource reference parsing
//! - Pod resolution for services (endpoints, then selector)
//! - Password discovery from a pod's environment
//! - `kubectl port-forward` tunnels with readiness gating
//! - The bootstrap that ties them together before the database is opened

pub mod bootstrap;
pub mod credentials;
pub mod errors;
pub mod kubectl;
pub mod reference;
pub mod resolver;
pub mod target;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{BootstrapRequest, Bootstrapped, ConnectionBootstrapper};
pub use credentials::{CredentialDiscoverer, DEFAULT_PASSWORD_VAR, FALLBACK_PASSWORD_VAR};
pub use errors::{KubeError, Result};
pub use kubectl::{cluster_name, ForwardProcess, Kubectl, KubectlCli};
pub use reference::{ResourceKind, ResourceReference};
pub use resolver::{EndpointsLookup, PodLookup, PodResolver, SelectorLookup};
pub use target::{ConnectionTarget, DISCOVER_PASSWORD_PLACEHOLDER};
pub use tunnel::{
    PortProbe, ReadinessPolicy, TcpPortProbe, TunnelHandle, TunnelManager, DEFAULT_REMOTE_PORT,
};
