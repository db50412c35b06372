pub mod classify;

use std::collections::{HashMap, HashSet};
use shared::types::{AdvertisementIntent, EventKind, ServiceRef, ServiceSnapshot};
use crate::artifacts::hosts::HostEntry;
use crate::artifacts::services::{service_filename, ServiceDefinition};
use crate::artifacts::ArtifactStore;
use crate::conflict::{ArtifactName, ConflictTracker};
use crate::error::ArtifactError;

pub use classify::{compute_intent, should_advertise};

/// A name taken over from another service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub name: ArtifactName,
    pub previous: ServiceRef,
    pub current: ServiceRef,
}

/// Result of reconciling one service
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Some artifact was written or removed
    pub changed: bool,
    pub conflict: Option<Conflict>,
}

/// Totals for a full pass over a service list
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub changed: bool,
    pub reconciled: usize,
    pub failed: usize,
    /// Owners absent from the list whose artifacts were removed
    pub pruned: usize,
    pub conflicts: usize,
}

/// Turns service state into artifacts. Owns the ownership index so
/// reconciliation is deterministic given the store contents and the input.
pub struct Reconciler {
    tracker: ConflictTracker,
    store: ArtifactStore,
    /// Set by every artifact mutation, including those followed by an error
    mutated: bool,
}

impl Reconciler {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            tracker: ConflictTracker::new(),
            store,
            mutated: false,
        }
    }

    /// Whether any artifact changed since the last call
    pub fn take_mutated(&mut self) -> bool {
        std::mem::take(&mut self.mutated)
    }

    pub fn tracker(&self) -> &ConflictTracker {
        &self.tracker
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Seed ownership from artifacts written by a previous run
    pub fn recover(&mut self) -> Result<usize, ArtifactError> {
        let claims = self.store.recover_claims()?;
        let count = claims.len();
        for (name, owner) in claims {
            self.tracker.claim(name, &owner);
        }
        tracing::info!("Recovered {} managed advertisements from disk", count);
        Ok(count)
    }

    /// Reconcile one watch event
    pub fn handle(
        &mut self,
        kind: EventKind,
        service: &ServiceSnapshot,
    ) -> Result<Outcome, ArtifactError> {
        tracing::debug!("Event: {} for {}", kind, service.service);

        let intent = match kind {
            EventKind::Added | EventKind::Modified => compute_intent(service),
            EventKind::Deleted => AdvertisementIntent::None,
        };
        self.apply(&service.service, intent)
    }

    /// Make the artifacts owned by `owner` match `intent`.
    ///
    /// Names the owner holds but no longer resolves to are removed first. On
    /// error nothing further is attempted and ownership of the failed name is
    /// left as it was.
    pub fn apply(
        &mut self,
        owner: &ServiceRef,
        intent: AdvertisementIntent,
    ) -> Result<Outcome, ArtifactError> {
        let target = target_name(&intent);
        let mut outcome = Outcome::default();

        for held in self.tracker.names_owned_by(owner) {
            if Some(&held) == target.as_ref() {
                continue;
            }
            if self.store.remove(&held)? {
                outcome.changed = true;
                self.mutated = true;
                tracing::info!("Removed Avahi advertisement: {} ({})", held, owner);
            }
            self.tracker.release(&held, owner);
        }

        let wrote = match &intent {
            AdvertisementIntent::HostRecord { hostname, address } => {
                self.store.write_host(&HostEntry {
                    address: *address,
                    hostname: hostname.clone(),
                    owner: owner.clone(),
                })?
            }
            AdvertisementIntent::ServiceRecord {
                name,
                port,
                service_type,
                txt_records,
            } => self.store.write_service(&ServiceDefinition {
                name: name.clone(),
                port: *port,
                service_type: service_type.clone(),
                txt_records: txt_records.clone(),
                owner: owner.clone(),
            })?,
            AdvertisementIntent::None => false,
        };

        let Some(name) = target else {
            return Ok(outcome);
        };

        if let Some(previous) = self.tracker.claim(name.clone(), owner) {
            tracing::error!(
                "CONFLICT: service {} wants {} which is already claimed by {}. \
                 The previous advertisement has been overwritten. \
                 Consider using the avahi.local/name annotation to pick a unique name.",
                owner,
                name,
                previous
            );
            outcome.conflict = Some(Conflict {
                name: name.clone(),
                previous,
                current: owner.clone(),
            });
        }

        if wrote {
            outcome.changed = true;
            self.mutated = true;
            match &intent {
                AdvertisementIntent::HostRecord { hostname, address } => {
                    tracing::info!("Wrote Avahi A record: {} → {} ({})", hostname, address, owner)
                }
                AdvertisementIntent::ServiceRecord { port, .. } => {
                    tracing::info!("Wrote Avahi service record: {} for {} on port {}", name, owner, port)
                }
                AdvertisementIntent::None => {}
            }
        }

        Ok(outcome)
    }

    /// Reconcile a complete service list, then drop advertisements of owners
    /// that are no longer listed. Failures are logged per service and skipped.
    ///
    /// A name contested by two listed services stays with its current holder,
    /// so replaying an unchanged list rewrites nothing.
    pub fn resync(&mut self, services: &[ServiceSnapshot]) -> ResyncSummary {
        let mut summary = ResyncSummary::default();
        let mut listed = HashSet::with_capacity(services.len());

        let intents: Vec<(&ServiceSnapshot, AdvertisementIntent)> = services
            .iter()
            .map(|service| (service, compute_intent(service)))
            .collect();
        let wanted: HashMap<ServiceRef, ArtifactName> = intents
            .iter()
            .filter_map(|(service, intent)| target_name(intent).map(|name| (service.service.clone(), name)))
            .collect();

        for (service, intent) in intents {
            listed.insert(service.service.clone());

            let intent = match target_name(&intent) {
                Some(name) => match self.tracker.owner_of(&name) {
                    Some(holder) if *holder != service.service && wanted.get(holder) == Some(&name) => {
                        tracing::warn!(
                            "{} also wants {}; keeping it with {}",
                            service.service,
                            name,
                            holder
                        );
                        summary.conflicts += 1;
                        AdvertisementIntent::None
                    }
                    _ => intent,
                },
                None => intent,
            };

            match self.apply(&service.service, intent) {
                Ok(outcome) => {
                    summary.reconciled += 1;
                    summary.changed |= outcome.changed;
                    summary.conflicts += usize::from(outcome.conflict.is_some());
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("Failed to reconcile {}: {}", service.service, e);
                }
            }
        }

        for owner in self.tracker.owners() {
            if listed.contains(&owner) {
                continue;
            }
            match self.apply(&owner, AdvertisementIntent::None) {
                Ok(outcome) => {
                    summary.pruned += 1;
                    summary.changed |= outcome.changed;
                    tracing::info!("Pruned advertisements of vanished service {}", owner);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("Failed to prune advertisements of {}: {}", owner, e);
                }
            }
        }

        summary
    }
}

/// The name an intent claims, if any
fn target_name(intent: &AdvertisementIntent) -> Option<ArtifactName> {
    match intent {
        AdvertisementIntent::HostRecord { hostname, .. } => Some(ArtifactName::Host(hostname.clone())),
        AdvertisementIntent::ServiceRecord { name, .. } => {
            Some(ArtifactName::ServiceFile(service_filename(name)))
        }
        AdvertisementIntent::None => None,
    }
}
