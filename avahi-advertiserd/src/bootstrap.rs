use std::time::Duration;
use shared::types::ServiceSnapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use crate::error::WatchError;
use crate::reconcile::Reconciler;
use crate::reload::{ReloadGate, Reloader};
use crate::status::{claim_views, compute_hash, StatusSnapshot};
use crate::watch::{ServiceApi, WatchSource, WatchUpdate};

/// Drives reconciliation: one full pass over every service, then the watch loop.
pub struct Advertiser<R> {
    reconciler: Reconciler,
    gate: ReloadGate<R>,
    status_tx: watch::Sender<StatusSnapshot>,
    node: String,
    reload_retry: Duration,
}

impl<R: Reloader> Advertiser<R> {
    pub fn new(
        reconciler: Reconciler,
        gate: ReloadGate<R>,
        status_tx: watch::Sender<StatusSnapshot>,
        node: String,
        reload_retry: Duration,
    ) -> Self {
        Self {
            reconciler,
            gate,
            status_tx,
            node,
            reload_retry,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn gate(&self) -> &ReloadGate<R> {
        &self.gate
    }

    /// Reconcile every currently known service and reload once.
    ///
    /// Returns the resourceVersion to start watching from. A failed list is
    /// returned to the caller, which treats it as fatal.
    pub async fn bootstrap<A: ServiceApi>(&mut self, api: &A) -> Result<String, WatchError> {
        tracing::info!("Syncing existing services...");

        let list = api.list().await?;
        self.resync(&list.items);
        self.flush().await;
        self.publish("connecting", &list.resource_version);

        Ok(list.resource_version)
    }

    /// Process watch updates until `cancel` fires.
    ///
    /// Events already buffered on the stream are reconciled as one batch
    /// followed by a single reload. A failed reload is retried on the next
    /// batch or after `reload_retry`, whichever comes first.
    pub async fn run<A: ServiceApi>(&mut self, source: &mut WatchSource<A>, cancel: &CancellationToken) {
        tracing::info!("Starting to watch Kubernetes services...");

        let mut retry = tokio::time::interval(self.reload_retry);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        retry.reset();

        loop {
            tokio::select! {
                update = source.next(cancel) => {
                    let Some(update) = update else {
                        break;
                    };
                    self.process(update);
                    while let Some(buffered) = source.next_ready() {
                        self.process(buffered);
                    }
                    self.flush().await;
                }
                _ = retry.tick(), if self.gate.is_dirty() => {
                    tracing::info!("Retrying avahi-daemon reload");
                    self.flush().await;
                }
            }
            self.publish(source.state_name(), source.resource_version());
        }

        tracing::info!("Service watch stopped");
    }

    fn process(&mut self, update: WatchUpdate) {
        match update {
            WatchUpdate::Event(kind, service) => {
                if let Err(e) = self.reconciler.handle(kind, &service) {
                    tracing::error!("Failed to reconcile {} ({}): {}", service.service, kind, e);
                }
            }
            WatchUpdate::Relisted(services) => self.resync(&services),
        }
        self.note_mutations();
    }

    /// Partial changes before a failed write count too
    fn note_mutations(&mut self) {
        if self.reconciler.take_mutated() {
            self.gate.mark_dirty();
        }
    }

    fn resync(&mut self, services: &[ServiceSnapshot]) {
        let summary = self.reconciler.resync(services);
        tracing::info!(
            "Reconciled {} services ({} failed, {} pruned, {} conflicts)",
            summary.reconciled,
            summary.failed,
            summary.pruned,
            summary.conflicts
        );
        self.note_mutations();
    }

    async fn flush(&mut self) {
        // Failure is logged by the gate and retried later
        let _ = self.gate.flush_if_dirty().await;
    }

    fn publish(&self, watch_state: &'static str, resource_version: &str) {
        let claims = claim_views(self.reconciler.tracker());
        let snapshot = StatusSnapshot {
            node: self.node.clone(),
            watch_state,
            resource_version: resource_version.to_string(),
            reload_pending: self.gate.is_dirty(),
            last_reload: self.gate.last_reload(),
            last_reload_error: self.gate.last_error().map(String::from),
            claims_hash: compute_hash(&claims),
            claims,
        };
        self.status_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{EventKind, ServiceRef};
    use crate::artifacts::ArtifactStore;
    use crate::config::WatchConfig;
    use crate::conflict::ArtifactName;
    use crate::test_support::{annotate, load_balancer, node_port, temp_store, FakeApi, FakeReloader};
    use crate::watch::WatchItem;

    const SHOP_LINE: &str = "10.0.42.50 shop.local # Managed by k8s-avahi-advertiser (web/shop)\n";

    fn advertiser(
        store: ArtifactStore,
        reloader: &FakeReloader,
    ) -> (Advertiser<FakeReloader>, watch::Receiver<StatusSnapshot>) {
        let (tx, rx) = watch::channel(StatusSnapshot::starting("node-1".to_string()));
        let advertiser = Advertiser::new(
            Reconciler::new(store),
            ReloadGate::new(reloader.clone()),
            tx,
            "node-1".to_string(),
            Duration::from_secs(30),
        );
        (advertiser, rx)
    }

    fn event(kind: EventKind, service: ServiceSnapshot, rv: &str) -> Result<WatchItem, WatchError> {
        Ok(WatchItem::Event {
            kind,
            service,
            resource_version: Some(rv.to_string()),
        })
    }

    /// Run the watch loop until the published status satisfies `done`
    async fn run_until(
        advertiser: &mut Advertiser<FakeReloader>,
        source: &mut WatchSource<FakeApi>,
        status: &mut watch::Receiver<StatusSnapshot>,
        done: impl FnMut(&StatusSnapshot) -> bool,
    ) {
        let cancel = CancellationToken::new();
        tokio::join!(advertiser.run(source, &cancel), async {
            status.wait_for(done).await.unwrap();
            cancel.cancel();
        });
    }

    #[tokio::test]
    async fn test_bootstrap_advertises_existing_services_and_reloads_once() {
        let (dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        api.set_list(
            vec![
                load_balancer("web", "shop", Some("10.0.42.50")),
                annotate(node_port("tools", "grafana", Some(31000)), "name", "dashboards"),
            ],
            "100",
        );

        let rv = advertiser.bootstrap(&api).await.unwrap();

        assert_eq!(rv, "100");
        assert_eq!(std::fs::read_to_string(dir.path().join("hosts")).unwrap(), SHOP_LINE);
        let xml = std::fs::read_to_string(dir.path().join("services/k8s-dashboards.service")).unwrap();
        assert!(xml.contains("<port>31000</port>"));
        assert_eq!(reloader.calls(), 1);

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.resource_version, "100");
        assert_eq!(snapshot.claims.len(), 2);
        assert!(!snapshot.reload_pending);
    }

    #[tokio::test]
    async fn test_bootstrap_list_failure_is_returned() {
        let (_dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, _status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        api.fail_list(WatchError::Transient("connection refused".to_string()));

        assert!(advertiser.bootstrap(&api).await.is_err());
        assert_eq!(reloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_service_takes_over_hostname() {
        let (dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        api.set_list(vec![load_balancer("web", "shop", Some("10.0.42.50"))], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        let shop2 = annotate(load_balancer("web", "shop2", Some("10.0.42.60")), "name", "shop");
        api.push_watch(Ok(vec![event(EventKind::Added, shop2, "11")]));
        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| s.resource_version == "11").await;

        assert_eq!(
            std::fs::read_to_string(dir.path().join("hosts")).unwrap(),
            "10.0.42.60 shop.local # Managed by k8s-avahi-advertiser (web/shop2)\n"
        );
        assert_eq!(
            advertiser.reconciler().tracker().owner_of(&ArtifactName::Host("shop.local".to_string())),
            Some(&ServiceRef::new("web", "shop2"))
        );
        assert_eq!(reloader.calls(), 2);
    }

    #[tokio::test]
    async fn test_buffered_batch_triggers_a_single_reload() {
        let (dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        let shop = load_balancer("web", "shop", Some("10.0.42.50"));
        api.set_list(vec![shop.clone()], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        api.push_watch(Ok(vec![
            event(EventKind::Modified, annotate(shop, "enabled", "false"), "11"),
            event(EventKind::Added, node_port("tools", "grafana", Some(31000)), "12"),
        ]));
        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| s.resource_version == "12").await;

        assert_eq!(std::fs::read_to_string(dir.path().join("hosts")).unwrap(), "");
        assert!(dir.path().join("services/k8s-grafana.service").exists());
        assert_eq!(reloader.calls(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_events_do_not_reload() {
        let (_dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        let shop = load_balancer("web", "shop", Some("10.0.42.50"));
        api.set_list(vec![shop.clone()], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        api.push_watch(Ok(vec![event(EventKind::Modified, shop, "11")]));
        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| s.resource_version == "11").await;

        assert_eq!(reloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_still_reloads_for_removed_file() {
        let (dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        let grafana = node_port("tools", "grafana", Some(31000));
        api.set_list(vec![grafana.clone()], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        std::fs::create_dir(dir.path().join("services/k8s-dashboards.service")).unwrap();
        api.push_watch(Ok(vec![event(
            EventKind::Modified,
            annotate(grafana, "name", "dashboards"),
            "11",
        )]));
        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| s.resource_version == "11").await;

        assert!(!dir.path().join("services/k8s-grafana.service").exists());
        assert_eq!(reloader.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_watch_relists_and_reconciles() {
        let (dir, store) = temp_store();
        let reloader = FakeReloader::default();
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        let shop = load_balancer("web", "shop", Some("10.0.42.50"));
        api.set_list(vec![shop.clone()], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        // blog appeared while the watch was expired
        api.push_watch(Err(WatchError::Stale("too old resource version".to_string())));
        api.set_list(vec![shop, node_port("web", "blog", Some(30080))], "20");
        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| s.claims.len() == 2).await;

        assert!(dir.path().join("services/k8s-blog.service").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("hosts")).unwrap(), SHOP_LINE);
        assert_eq!(api.list_calls(), 2);
        assert_eq!(api.watched_versions(), vec!["10", "20"]);
        assert_eq!(reloader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reload_is_retried_without_new_events() {
        let (_dir, store) = temp_store();
        let reloader = FakeReloader::default();
        reloader.fail_next(1);
        let (mut advertiser, mut status) = advertiser(store, &reloader);
        let api = FakeApi::default();
        api.set_list(vec![load_balancer("web", "shop", Some("10.0.42.50"))], "10");
        let rv = advertiser.bootstrap(&api).await.unwrap();

        assert!(advertiser.gate().is_dirty());
        assert!(status.borrow().last_reload_error.is_some());

        let mut source = WatchSource::new(api.clone(), &WatchConfig::default(), rv);
        run_until(&mut advertiser, &mut source, &mut status, |s| !s.reload_pending).await;

        assert_eq!(reloader.calls(), 2);
        assert!(advertiser.gate().last_error().is_none());
    }
}
