//! Reservation record types.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

/// `MAINT` vs an ordinary user-requested carve-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationType {
    User,
    Maintenance,
}

impl ReservationType {
    pub(super) fn as_u16(self) -> u16 {
        match self {
            ReservationType::User => 0,
            ReservationType::Maintenance => 1,
        }
    }

    pub(super) fn from_u16(v: u16) -> Self {
        match v {
            1 => ReservationType::Maintenance,
            _ => ReservationType::User,
        }
    }
}

/// Which nodes a reservation covers: every node in the cluster, or an
/// explicit subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeSet {
    All,
    Explicit(FixedBitSet),
}

impl NodeSet {
    pub fn contains(&self, node: usize, cluster_node_count: usize) -> bool {
        match self {
            NodeSet::All => node < cluster_node_count,
            NodeSet::Explicit(bitmap) => bitmap.contains(node),
        }
    }

    pub fn node_count(&self, cluster_node_count: usize) -> u32 {
        match self {
            NodeSet::All => cluster_node_count as u32,
            NodeSet::Explicit(bitmap) => bitmap.count_ones(..) as u32,
        }
    }
}

/// A named, time-bounded carve-out of nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub name: String,
    pub start: u64,
    pub end: u64,
    pub accounts: Vec<String>,
    pub users: Vec<String>,
    pub nodes: NodeSet,
    pub required_features: Vec<String>,
    pub partition: Option<String>,
    pub kind: ReservationType,
}

impl Reservation {
    /// `true` if `account` or `user` is explicitly permitted. An empty
    /// list on one axis does not grant access via that axis.
    pub fn permits(&self, account: &str, user: &str) -> bool {
        self.accounts.iter().any(|a| a == account) || self.users.iter().any(|u| u == user)
    }

    pub fn is_active_at(&self, now: u64) -> bool {
        now >= self.start && now < self.end
    }
}

/// Request payload for [`super::ReservationManager::create`] /
/// [`super::ReservationManager::update`].
#[derive(Debug, Clone, Default)]
pub struct ReservationRequest {
    pub name: Option<String>,
    pub start: Option<u64>,
    pub duration_s: Option<u64>,
    pub end: Option<u64>,
    pub accounts: Vec<String>,
    pub users: Vec<String>,
    pub node_names: Option<Vec<String>>,
    pub all_nodes: bool,
    pub required_features: Vec<String>,
    pub partition: Option<String>,
    pub kind: Option<ReservationType>,
}
