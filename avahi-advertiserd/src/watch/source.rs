use std::future::Future;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::Client;
use shared::types::{EventKind, ExposureKind, IngressPoint, PortSnapshot, ServiceRef, ServiceSnapshot};
use crate::error::WatchError;

/// HTTP 410 Gone: the requested resourceVersion has been compacted away
const STATUS_GONE: u16 = 410;

/// One item of a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchItem {
    Event {
        kind: EventKind,
        service: ServiceSnapshot,
        resource_version: Option<String>,
    },
    /// Progress marker without a change
    Bookmark(String),
}

pub type WatchStream = BoxStream<'static, Result<WatchItem, WatchError>>;

/// Every service currently known, and the version to watch from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceList {
    pub items: Vec<ServiceSnapshot>,
    pub resource_version: String,
}

/// List+watch access to services in all namespaces
pub trait ServiceApi {
    fn list(&self) -> impl Future<Output = Result<ServiceList, WatchError>> + Send;

    fn watch(
        &self,
        resource_version: &str,
    ) -> impl Future<Output = Result<WatchStream, WatchError>> + Send;
}

/// `ServiceApi` backed by the Kubernetes API server
pub struct KubeServiceApi {
    api: Api<Service>,
    timeout_secs: u32,
}

impl KubeServiceApi {
    pub fn new(client: Client, timeout_secs: u32) -> Self {
        Self {
            api: Api::all(client),
            timeout_secs,
        }
    }
}

impl ServiceApi for KubeServiceApi {
    async fn list(&self) -> Result<ServiceList, WatchError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(classify_error)?;

        Ok(ServiceList {
            resource_version: list.metadata.resource_version.clone().unwrap_or_default(),
            items: list.items.iter().filter_map(snapshot_from_service).collect(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream, WatchError> {
        let params = WatchParams::default().timeout(self.timeout_secs);
        let stream = self
            .api
            .watch(&params, resource_version)
            .await
            .map_err(classify_error)?;

        Ok(stream
            .filter_map(|event| futures::future::ready(convert_event(event)))
            .boxed())
    }
}

fn convert_event(event: kube::Result<WatchEvent<Service>>) -> Option<Result<WatchItem, WatchError>> {
    let (kind, service) = match event {
        Ok(WatchEvent::Added(service)) => (EventKind::Added, service),
        Ok(WatchEvent::Modified(service)) => (EventKind::Modified, service),
        Ok(WatchEvent::Deleted(service)) => (EventKind::Deleted, service),
        Ok(WatchEvent::Bookmark(bookmark)) => {
            return Some(Ok(WatchItem::Bookmark(bookmark.metadata.resource_version)));
        }
        Ok(WatchEvent::Error(response)) => {
            return Some(Err(error_from_status(response.code, response.message)));
        }
        Err(e) => return Some(Err(classify_error(e))),
    };

    let Some(snapshot) = snapshot_from_service(&service) else {
        tracing::warn!("Ignoring {} event for a service without name or namespace", kind);
        return None;
    };

    Some(Ok(WatchItem::Event {
        kind,
        service: snapshot,
        resource_version: service.metadata.resource_version.clone(),
    }))
}

fn classify_error(error: kube::Error) -> WatchError {
    match error {
        kube::Error::Api(response) => error_from_status(response.code, response.message),
        other => WatchError::Transient(other.to_string()),
    }
}

fn error_from_status(code: u16, message: String) -> WatchError {
    if code == STATUS_GONE {
        WatchError::Stale(message)
    } else {
        WatchError::Transient(format!("API error {}: {}", code, message))
    }
}

/// Reduce a Kubernetes service to what the reconciler needs
pub fn snapshot_from_service(service: &Service) -> Option<ServiceSnapshot> {
    let namespace = service.metadata.namespace.clone()?;
    let name = service.metadata.name.clone()?;
    let spec = service.spec.as_ref();

    let exposure = ExposureKind::from_type(spec.and_then(|s| s.type_.as_deref()));

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| PortSnapshot {
                    name: p.name.clone(),
                    port: u16::try_from(p.port).unwrap_or_default(),
                    node_port: p
                        .node_port
                        .and_then(|n| u16::try_from(n).ok())
                        .filter(|n| *n != 0),
                })
                .collect()
        })
        .unwrap_or_default();

    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|points| {
            points
                .iter()
                .map(|point| IngressPoint {
                    ip: point.ip.as_deref().and_then(|ip| ip.parse().ok()),
                    hostname: point.hostname.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ServiceSnapshot {
        service: ServiceRef::new(namespace, name),
        exposure,
        ingress,
        ports,
        annotations: service.metadata.annotations.clone().unwrap_or_default(),
    })
}
