use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use shared::types::ServiceRef;

/// An advertised name. Hostnames and service files live in separate key spaces:
/// a host record and a service file may share a name without conflicting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactName {
    /// Fully qualified hostname in the hosts file
    Host(String),
    /// File name inside the services directory
    ServiceFile(String),
}

impl ArtifactName {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactName::Host(_) => "host",
            ArtifactName::ServiceFile(_) => "service_file",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ArtifactName::Host(name) | ArtifactName::ServiceFile(name) => name,
        }
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactName::Host(name) => write!(f, "hostname '{}'", name),
            ArtifactName::ServiceFile(name) => write!(f, "service file '{}'", name),
        }
    }
}

/// Index of advertised name -> owning service.
///
/// Last writer wins: a claim by a different service displaces the holder and
/// reports it so the caller can log the conflict.
#[derive(Debug, Default)]
pub struct ConflictTracker {
    owners: BTreeMap<ArtifactName, ServiceRef>,
    by_owner: BTreeMap<ServiceRef, BTreeSet<ArtifactName>>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `owner` for `name`, returning the displaced owner if it differs
    pub fn claim(&mut self, name: ArtifactName, owner: &ServiceRef) -> Option<ServiceRef> {
        let prior = self.owners.insert(name.clone(), owner.clone());

        if let Some(prior) = &prior {
            if prior == owner {
                return None;
            }
            self.forget_reverse(prior, &name);
        }

        self.by_owner.entry(owner.clone()).or_default().insert(name);
        prior
    }

    /// Drop the claim if `owner` still holds it. Returns whether anything was removed.
    pub fn release(&mut self, name: &ArtifactName, owner: &ServiceRef) -> bool {
        match self.owners.get(name) {
            Some(current) if current == owner => {
                self.owners.remove(name);
                self.forget_reverse(owner, name);
                true
            }
            _ => false,
        }
    }

    pub fn owner_of(&self, name: &ArtifactName) -> Option<&ServiceRef> {
        self.owners.get(name)
    }

    pub fn names_owned_by(&self, owner: &ServiceRef) -> Vec<ArtifactName> {
        self.by_owner
            .get(owner)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn owners(&self) -> Vec<ServiceRef> {
        self.by_owner.keys().cloned().collect()
    }

    /// All claims, ordered by name
    pub fn claims(&self) -> impl Iterator<Item = (&ArtifactName, &ServiceRef)> {
        self.owners.iter()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn forget_reverse(&mut self, owner: &ServiceRef, name: &ArtifactName) {
        if let Some(names) = self.by_owner.get_mut(owner) {
            names.remove(name);
            if names.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }
}
