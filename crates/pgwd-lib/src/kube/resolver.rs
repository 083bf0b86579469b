//! Resolves a service or pod reference to a concrete pod name.
//!
//! Services are resolved by an ordered list of lookups; the first lookup
//! that names a pod wins and later lookups are never run.

use async_trait::async_trait;
use tracing::{debug, info};

use super::errors::{KubeError, Result};
use super::kubectl::{to_args, Kubectl};
use super::reference::{ResourceKind, ResourceReference};

/// One way of finding a pod behind a service.
#[async_trait]
pub trait PodLookup: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "nothing found, try the next lookup".
    async fn lookup(
        &self,
        kubectl: &dyn Kubectl,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>>;
}

/// First address of the service's endpoints.
pub struct EndpointsLookup;

#[async_trait]
impl PodLookup for EndpointsLookup {
    fn name(&self) -> &'static str {
        "endpoints"
    }

    async fn lookup(
        &self,
        kubectl: &dyn Kubectl,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let args = to_args(&[
            "get",
            "endpoints",
            "-n",
            namespace,
            service,
            "-o",
            "jsonpath={.subsets[0].addresses[0].targetRef.name}",
        ]);

        match kubectl.run(&args).await {
            Ok(pod) if !pod.is_empty() => Ok(Some(pod)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!(service = %service, error = %e, "Endpoints lookup failed");
                Ok(None)
            }
        }
    }
}

/// First pod matching the service's label selector.
pub struct SelectorLookup;

#[async_trait]
impl PodLookup for SelectorLookup {
    fn name(&self) -> &'static str {
        "selector"
    }

    async fn lookup(
        &self,
        kubectl: &dyn Kubectl,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let args = to_args(&[
            "get",
            "svc",
            "-n",
            namespace,
            service,
            "-o",
            "go-template={{range $k,$v := .spec.selector}}{{$k}}={{$v}},{{end}}",
        ]);

        let selector = match kubectl.run(&args).await {
            Ok(raw) => raw.trim_end_matches(',').to_string(),
            Err(e) => {
                debug!(service = %service, error = %e, "Selector lookup failed");
                return Ok(None);
            }
        };

        if selector.is_empty() {
            return Err(KubeError::SelectorEmpty {
                service: service.to_string(),
            });
        }

        let args = to_args(&[
            "get",
            "pods",
            "-n",
            namespace,
            "-l",
            &selector,
            "-o",
            "jsonpath={.items[0].metadata.name}",
        ]);

        match kubectl.run(&args).await {
            Ok(pod) if !pod.is_empty() => Ok(Some(pod)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!(service = %service, selector = %selector, error = %e, "Pod list failed");
                Ok(None)
            }
        }
    }
}

/// Finds the pod to read credentials from.
pub struct PodResolver {
    lookups: Vec<Box<dyn PodLookup>>,
}

impl PodResolver {
    /// Endpoints first, then the service selector.
    pub fn new() -> Self {
        Self::with_lookups(vec![Box::new(EndpointsLookup), Box::new(SelectorLookup)])
    }

    pub fn with_lookups(lookups: Vec<Box<dyn PodLookup>>) -> Self {
        Self { lookups }
    }

    /// Pods resolve to themselves without calling kubectl.
    pub async fn resolve(
        &self,
        kubectl: &dyn Kubectl,
        reference: &ResourceReference,
    ) -> Result<String> {
        if reference.kind() == ResourceKind::Pod {
            return Ok(reference.name().to_string());
        }

        let namespace = reference.namespace();
        let service = reference.name();
        let mut last_error = None;

        for lookup in &self.lookups {
            match lookup.lookup(kubectl, namespace, service).await {
                Ok(Some(pod)) => {
                    info!(service = %service, pod = %pod, strategy = lookup.name(), "Resolved pod");
                    return Ok(pod);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(strategy = lookup.name(), error = %e, "Pod lookup gave up");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| KubeError::NoBackingInstance {
            service: service.to_string(),
        }))
    }
}

impl Default for PodResolver {
    fn default() -> Self {
        Self::new()
    }
}
