use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::conflict::ConflictTracker;

/// One advertised name and who owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    pub kind: &'static str,
    pub name: String,
    pub owner: String,
}

/// Point-in-time view of the advertiser, published after every pass
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub node: String,
    pub watch_state: &'static str,
    pub resource_version: String,
    pub reload_pending: bool,
    pub last_reload: Option<DateTime<Utc>>,
    pub last_reload_error: Option<String>,
    pub claims: Vec<ClaimView>,
    pub claims_hash: String,
}

impl StatusSnapshot {
    pub fn starting(node: String) -> Self {
        Self {
            node,
            watch_state: "starting",
            resource_version: String::new(),
            reload_pending: false,
            last_reload: None,
            last_reload_error: None,
            claims: Vec::new(),
            claims_hash: compute_hash(&[]),
        }
    }
}

/// Claims in name order, as the tracker keeps them
pub fn claim_views(tracker: &ConflictTracker) -> Vec<ClaimView> {
    tracker
        .claims()
        .map(|(name, owner)| ClaimView {
            kind: name.kind(),
            name: name.as_str().to_string(),
            owner: owner.to_string(),
        })
        .collect()
}

/// SHA-256 over the claim set, independent of input order
pub fn compute_hash(claims: &[ClaimView]) -> String {
    let mut sorted: Vec<&ClaimView> = claims.iter().collect();
    sorted.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));

    let mut hasher = Sha256::new();
    for claim in sorted {
        hasher.update(claim.kind.as_bytes());
        hasher.update([0]);
        hasher.update(claim.name.as_bytes());
        hasher.update([0]);
        hasher.update(claim.owner.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
