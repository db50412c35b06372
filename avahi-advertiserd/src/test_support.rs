use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use futures::stream::{self, StreamExt};
use shared::protocol::ANNOTATION_PREFIX;
use shared::types::{ExposureKind, IngressPoint, PortSnapshot, ServiceRef, ServiceSnapshot};
use crate::artifacts::ArtifactStore;
use crate::config::AvahiConfig;
use crate::error::{ReloadError, WatchError};
use crate::reload::Reloader;
use crate::watch::{ServiceApi, ServiceList, WatchItem, WatchStream};

pub fn load_balancer(namespace: &str, name: &str, ip: Option<&str>) -> ServiceSnapshot {
    ServiceSnapshot {
        service: ServiceRef::new(namespace, name),
        exposure: ExposureKind::LoadBalancer,
        ingress: ip
            .map(|ip| {
                vec![IngressPoint {
                    ip: Some(ip.parse().unwrap()),
                    hostname: None,
                }]
            })
            .unwrap_or_default(),
        ports: vec![PortSnapshot {
            name: Some("http".to_string()),
            port: 80,
            node_port: None,
        }],
        annotations: BTreeMap::new(),
    }
}

pub fn node_port(namespace: &str, name: &str, node_port: Option<u16>) -> ServiceSnapshot {
    ServiceSnapshot {
        service: ServiceRef::new(namespace, name),
        exposure: ExposureKind::NodePort,
        ingress: Vec::new(),
        ports: vec![PortSnapshot {
            name: Some("http".to_string()),
            port: 80,
            node_port,
        }],
        annotations: BTreeMap::new(),
    }
}

/// Set an `avahi.local/<key>` annotation
pub fn annotate(mut service: ServiceSnapshot, key: &str, value: &str) -> ServiceSnapshot {
    service
        .annotations
        .insert(format!("{}{}", ANNOTATION_PREFIX, key), value.to_string());
    service
}

/// Store rooted in a fresh directory: `<dir>/hosts` and `<dir>/services/`
pub fn temp_store() -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("services")).unwrap();

    let config = AvahiConfig {
        hosts_file: dir.path().join("hosts"),
        services_dir: dir.path().join("services"),
        ..AvahiConfig::default()
    };
    let store = ArtifactStore::open(&config).unwrap();
    (dir, store)
}

#[derive(Default)]
struct ReloaderState {
    calls: usize,
    failures_left: usize,
}

/// Counts reloads; can be told to fail
#[derive(Clone, Default)]
pub struct FakeReloader {
    state: Arc<Mutex<ReloaderState>>,
}

impl FakeReloader {
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().failures_left = count;
    }
}

impl Reloader for FakeReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(ReloadError::Failed {
                command: "fake-reload".to_string(),
                code: 1,
                stderr: "avahi-daemon is not running".to_string(),
            });
        }
        Ok(())
    }
}

enum ScriptedWatch {
    Items(Vec<Result<WatchItem, WatchError>>),
    Fail(WatchError),
    Pending,
}

#[derive(Default)]
struct ApiState {
    watches: VecDeque<ScriptedWatch>,
    list: ServiceList,
    list_failures: VecDeque<WatchError>,
    list_calls: usize,
    watched_versions: Vec<String>,
}

/// Scripted `ServiceApi`. Each `watch` call consumes the next scripted
/// subscription; once the script runs out, watches stay open and silent.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    pub fn push_watch(&self, result: Result<Vec<Result<WatchItem, WatchError>>, WatchError>) {
        let scripted = match result {
            Ok(items) => ScriptedWatch::Items(items),
            Err(e) => ScriptedWatch::Fail(e),
        };
        self.state.lock().unwrap().watches.push_back(scripted);
    }

    pub fn push_pending_watch(&self) {
        self.state.lock().unwrap().watches.push_back(ScriptedWatch::Pending);
    }

    pub fn set_list(&self, items: Vec<ServiceSnapshot>, resource_version: &str) {
        self.state.lock().unwrap().list = ServiceList {
            items,
            resource_version: resource_version.to_string(),
        };
    }

    pub fn fail_list(&self, error: WatchError) {
        self.state.lock().unwrap().list_failures.push_back(error);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn watched_versions(&self) -> Vec<String> {
        self.state.lock().unwrap().watched_versions.clone()
    }
}

impl ServiceApi for FakeApi {
    async fn list(&self) -> Result<ServiceList, WatchError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        match state.list_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(state.list.clone()),
        }
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream, WatchError> {
        let mut state = self.state.lock().unwrap();
        state.watched_versions.push(resource_version.to_string());
        match state.watches.pop_front() {
            Some(ScriptedWatch::Items(items)) => Ok(stream::iter(items).boxed()),
            Some(ScriptedWatch::Fail(e)) => Err(e),
            Some(ScriptedWatch::Pending) | None => Ok(stream::pending().boxed()),
        }
    }
}
