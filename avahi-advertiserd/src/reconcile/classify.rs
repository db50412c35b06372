//! Pure decisions over a service snapshot: whether it is advertised and as what.

use std::collections::BTreeMap;
use shared::protocol::{
    ANNOTATION_ENABLED, ANNOTATION_NAME, ANNOTATION_PREFIX, ANNOTATION_SERVICE_TYPE,
    ANNOTATION_TXT_PREFIX, DEFAULT_SERVICE_TYPE, LOCAL_DOMAIN,
};
use shared::types::{AdvertisementIntent, ExposureKind, ServiceSnapshot};

/// Annotations under the advertiser prefix, keyed without it
pub fn avahi_annotations(service: &ServiceSnapshot) -> BTreeMap<&str, &str> {
    service
        .annotations
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(ANNOTATION_PREFIX)
                .map(|short| (short, value.as_str()))
        })
        .collect()
}

fn is_disabled(annotations: &BTreeMap<&str, &str>) -> bool {
    annotations
        .get(ANNOTATION_ENABLED)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("false"))
}

/// The name a service is advertised under: the `name` annotation, else the resource name
pub fn advertised_name(service: &ServiceSnapshot) -> String {
    avahi_annotations(service)
        .get(ANNOTATION_NAME)
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .unwrap_or_else(|| service.service.name.clone())
}

pub fn should_advertise(service: &ServiceSnapshot) -> bool {
    let eligible = match service.exposure {
        ExposureKind::LoadBalancer => !service.ingress.is_empty(),
        ExposureKind::NodePort => true,
        ExposureKind::Other(_) => false,
    };

    eligible && !is_disabled(&avahi_annotations(service))
}

/// Derive what `service` should be advertised as. Returns `None` for services
/// that are not (yet) advertisable; callers remove any prior artifact.
pub fn compute_intent(service: &ServiceSnapshot) -> AdvertisementIntent {
    if !should_advertise(service) {
        if service.exposure == ExposureKind::LoadBalancer && !is_disabled(&avahi_annotations(service)) {
            tracing::warn!("LoadBalancer service {} has no ingress assigned yet", service.service);
        }
        return AdvertisementIntent::None;
    }

    match service.exposure {
        ExposureKind::LoadBalancer => host_intent(service),
        ExposureKind::NodePort => service_intent(service),
        ExposureKind::Other(_) => AdvertisementIntent::None,
    }
}

/// A dot-separated DNS name whose labels are 1-63 letters, digits or inner hyphens
fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

fn host_intent(service: &ServiceSnapshot) -> AdvertisementIntent {
    let name = advertised_name(service);
    if !is_valid_hostname(&name) {
        tracing::warn!(
            "Service {} has invalid hostname {:?}, not advertising",
            service.service,
            name
        );
        return AdvertisementIntent::None;
    }

    let Some(address) = service.ingress.first().and_then(|ingress| ingress.ip) else {
        tracing::warn!(
            "LoadBalancer service {} has no IP assigned yet",
            service.service
        );
        return AdvertisementIntent::None;
    };

    AdvertisementIntent::HostRecord {
        hostname: format!("{}.{}", name, LOCAL_DOMAIN),
        address,
    }
}

fn service_intent(service: &ServiceSnapshot) -> AdvertisementIntent {
    let Some(first) = service.ports.first() else {
        tracing::warn!("Service {} has no ports defined", service.service);
        return AdvertisementIntent::None;
    };
    let Some(port) = first.node_port else {
        tracing::warn!("NodePort service {} has no nodePort assigned", service.service);
        return AdvertisementIntent::None;
    };

    let annotations = avahi_annotations(service);
    let service_type = annotations
        .get(ANNOTATION_SERVICE_TYPE)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_SERVICE_TYPE)
        .to_string();

    let txt_records = annotations
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(ANNOTATION_TXT_PREFIX)
                .filter(|txt_key| !txt_key.is_empty())
                .map(|txt_key| (txt_key.to_string(), value.to_string()))
        })
        .collect();

    AdvertisementIntent::ServiceRecord {
        name: advertised_name(service),
        port,
        service_type,
        txt_records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::IngressPoint;
    use crate::test_support::{annotate, load_balancer, node_port};

    #[test]
    fn test_should_advertise_by_kind() {
        assert!(should_advertise(&load_balancer("web", "shop", Some("10.0.42.50"))));
        assert!(!should_advertise(&load_balancer("web", "shop", None)));
        assert!(should_advertise(&node_port("tools", "grafana", Some(31000))));

        let mut cluster_ip = node_port("tools", "grafana", Some(31000));
        cluster_ip.exposure = ExposureKind::Other("ClusterIP".to_string());
        assert!(!should_advertise(&cluster_ip));
    }

    #[test]
    fn test_enabled_false_suppresses_any_kind() {
        let lb = annotate(load_balancer("web", "shop", Some("10.0.42.50")), "enabled", "False");
        assert!(!should_advertise(&lb));
        assert_eq!(compute_intent(&lb), AdvertisementIntent::None);

        let np = annotate(node_port("tools", "grafana", Some(31000)), "enabled", "false");
        assert!(!should_advertise(&np));

        let explicit_on = annotate(node_port("tools", "grafana", Some(31000)), "enabled", "true");
        assert!(should_advertise(&explicit_on));
    }

    #[test]
    fn test_host_intent_defaults_to_resource_name() {
        let intent = compute_intent(&load_balancer("web", "shop", Some("10.0.42.50")));
        assert_eq!(
            intent,
            AdvertisementIntent::HostRecord {
                hostname: "shop.local".to_string(),
                address: "10.0.42.50".parse().unwrap(),
            }
        );
    }

    #[test]
    fn test_host_intent_name_override_and_first_address() {
        let mut svc = annotate(load_balancer("web", "shop", Some("10.0.42.50")), "name", "store");
        svc.ingress.push(IngressPoint {
            ip: Some("10.0.42.51".parse().unwrap()),
            hostname: None,
        });

        let intent = compute_intent(&svc);
        assert_eq!(
            intent,
            AdvertisementIntent::HostRecord {
                hostname: "store.local".to_string(),
                address: "10.0.42.50".parse().unwrap(),
            }
        );
    }

    #[test]
    fn test_hostname_only_ingress_is_not_advertisable() {
        let mut svc = load_balancer("web", "shop", None);
        svc.ingress.push(IngressPoint {
            ip: None,
            hostname: Some("lb.example.com".to_string()),
        });

        assert!(should_advertise(&svc));
        assert_eq!(compute_intent(&svc), AdvertisementIntent::None);
    }

    #[test]
    fn test_pending_load_balancer_has_no_intent() {
        let svc = load_balancer("web", "shop", None);
        assert!(!should_advertise(&svc));
        assert_eq!(compute_intent(&svc), AdvertisementIntent::None);
    }

    #[test]
    fn test_invalid_hostnames_are_rejected() {
        for name in ["my shop", "a\n10.9.9.9 bank", "shop#x", "-shop", "shop..local", "café"] {
            let svc = annotate(load_balancer("web", "shop", Some("10.0.42.50")), "name", name);
            assert_eq!(compute_intent(&svc), AdvertisementIntent::None, "{:?}", name);
        }

        let svc = annotate(load_balancer("web", "shop", Some("10.0.42.50")), "name", "store-2.eu");
        assert!(matches!(
            compute_intent(&svc),
            AdvertisementIntent::HostRecord { ref hostname, .. } if hostname == "store-2.eu.local"
        ));
    }

    #[test]
    fn test_service_intent_with_annotations() {
        let svc = node_port("tools", "grafana", Some(31000));
        let svc = annotate(svc, "name", "dashboards");
        let svc = annotate(svc, "service-type", "_https._tcp");
        let svc = annotate(svc, "txt-path", "/login");
        let svc = annotate(svc, "txt-version", "10");

        assert_eq!(
            compute_intent(&svc),
            AdvertisementIntent::ServiceRecord {
                name: "dashboards".to_string(),
                port: 31000,
                service_type: "_https._tcp".to_string(),
                txt_records: BTreeMap::from([
                    ("path".to_string(), "/login".to_string()),
                    ("version".to_string(), "10".to_string()),
                ]),
            }
        );
    }

    #[test]
    fn test_service_intent_defaults() {
        let mut svc = node_port("tools", "grafana", Some(31000));
        svc.annotations
            .insert("unrelated.io/txt-foo".to_string(), "bar".to_string());

        assert_eq!(
            compute_intent(&svc),
            AdvertisementIntent::ServiceRecord {
                name: "grafana".to_string(),
                port: 31000,
                service_type: "_http._tcp".to_string(),
                txt_records: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_missing_node_port_or_ports() {
        assert_eq!(
            compute_intent(&node_port("tools", "grafana", None)),
            AdvertisementIntent::None
        );

        let mut no_ports = node_port("tools", "grafana", Some(31000));
        no_ports.ports.clear();
        assert_eq!(compute_intent(&no_ports), AdvertisementIntent::None);
    }
}
