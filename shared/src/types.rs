use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Identity of a watched cluster service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseServiceRefError(pub String);

impl fmt::Display for ParseServiceRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid service reference {:?}, expected namespace/name", self.0)
    }
}

impl std::error::Error for ParseServiceRefError {}

impl FromStr for ServiceRef {
    type Err = ParseServiceRefError;

    /// Parses the `namespace/name` form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ParseServiceRefError(s.to_string())),
        }
    }
}

/// How a service is reachable from outside the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureKind {
    /// Assigned a stable external address by a load balancer
    LoadBalancer,
    /// Reachable through a per-node port
    NodePort,
    /// Anything else (ClusterIP, ExternalName, ...)
    Other(String),
}

impl ExposureKind {
    pub fn from_type(service_type: Option<&str>) -> Self {
        match service_type {
            Some("LoadBalancer") => Self::LoadBalancer,
            Some("NodePort") => Self::NodePort,
            Some(other) => Self::Other(other.to_string()),
            // The API server defaults an absent type to ClusterIP
            None => Self::Other("ClusterIP".to_string()),
        }
    }
}

/// One entry of `status.loadBalancer.ingress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPoint {
    pub ip: Option<IpAddr>,
    pub hostname: Option<String>,
}

/// One entry of `spec.ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub name: Option<String>,
    pub port: u16,
    pub node_port: Option<u16>,
}

/// The subset of a cluster service the advertiser reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service: ServiceRef,
    pub exposure: ExposureKind,
    pub ingress: Vec<IngressPoint>,
    pub ports: Vec<PortSnapshot>,
    pub annotations: BTreeMap<String, String>,
}

/// What a service should currently be advertised as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisementIntent {
    /// Hostname-to-address record in the shared hosts file
    HostRecord {
        /// Fully qualified, e.g. "shop.local"
        hostname: String,
        address: IpAddr,
    },
    /// DNS-SD service definition file
    ServiceRecord {
        name: String,
        port: u16,
        /// e.g. "_http._tcp"
        service_type: String,
        txt_records: BTreeMap<String, String>,
    },
    /// Nothing should be advertised
    None,
}

/// Change kind reported by the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Added => "ADDED",
            EventKind::Modified => "MODIFIED",
            EventKind::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}
