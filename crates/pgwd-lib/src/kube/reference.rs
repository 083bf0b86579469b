//! `namespace/kind/name` resource references.

use std::fmt;
use std::str::FromStr;

use super::errors::KubeError;

/// Kinds of resource the watchdog can forward to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Service,
    Pod,
}

impl ResourceKind {
    /// kubectl short name (`svc`, `pod`).
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceKind::Service => "svc",
            ResourceKind::Pod => "pod",
        }
    }
}

/// A parsed `namespace/kind/name` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceReference {
    namespace: String,
    kind: ResourceKind,
    name: String,
}

impl ResourceReference {
    /// Parses `default/svc/postgres` or `default/pod/postgres-0`.
    ///
    /// Kind is case-insensitive. Any other number of `/`-separated parts,
    /// an empty namespace or name, or an unknown kind is rejected.
    pub fn parse(reference: &str) -> Result<Self, KubeError> {
        let parts: Vec<&str> = reference.split('/').collect();
        let [namespace, kind, name] = parts.as_slice() else {
            return Err(KubeError::MalformedReference(format!(
                "got {reference:?}"
            )));
        };

        if namespace.is_empty() || name.is_empty() {
            return Err(KubeError::MalformedReference(
                "namespace and name must be non-empty".to_string(),
            ));
        }

        let kind = match kind.to_ascii_lowercase().as_str() {
            "svc" => ResourceKind::Service,
            "pod" => ResourceKind::Pod,
            other => {
                return Err(KubeError::MalformedReference(format!(
                    "type must be svc or pod, got {other:?}"
                )))
            }
        };

        Ok(Self {
            namespace: namespace.to_string(),
            kind,
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `kind/name` as kubectl expects it, e.g. `svc/postgres`.
    pub fn resource(&self) -> String {
        format!("{}/{}", self.kind.short_name(), self.name)
    }
}

impl FromStr for ResourceReference {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.resource())
    }
}
