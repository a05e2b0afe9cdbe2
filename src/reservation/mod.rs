//! Reservation manager: named time-bounded node carve-outs.

pub mod persistence;
mod types;

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};

pub use types::{NodeSet, Reservation, ReservationRequest, ReservationType};

/// Clock skew tolerance for `start ≥ now`.
const START_TIME_SLACK_S: u64 = 60;

#[derive(Debug, Default)]
pub struct ReservationManager {
    by_name: HashMap<String, Reservation>,
}

impl ReservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Reservation> {
        self.by_name.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &Reservation> {
        self.by_name.values()
    }

    /// Re-inserts a reservation loaded from the persistence snapshot,
    /// bypassing `create`'s validation since it was already validated
    /// once before being written to disk.
    pub fn restore(&mut self, resv: Reservation) {
        debug!(name = %resv.name, "reservation restored from snapshot");
        self.by_name.insert(resv.name.clone(), resv);
    }

    /// Validates and inserts a new reservation, generating a name if the
    /// request didn't supply one.
    pub fn create(&mut self, req: ReservationRequest, cluster: &ClusterConfig, now: u64) -> Result<String> {
        let start = req.start.unwrap_or(now);
        if start + START_TIME_SLACK_S < now {
            return Err(Error::InvalidTimeValue(format!(
                "start time {start} is more than {START_TIME_SLACK_S}s in the past"
            )));
        }
        let end = match req.duration_s {
            Some(d) => start + d,
            None => match req.end {
                Some(e) if e > start => e,
                _ => {
                    return Err(Error::InvalidTimeValue(
                        "end time must be greater than start time".into(),
                    ))
                }
            },
        };
        if req.accounts.is_empty() && req.users.is_empty() {
            return Err(Error::ReservationInvalid(
                "at least one account or user must be given".into(),
            ));
        }
        if let Some(part) = &req.partition {
            if cluster.partition_by_name(part).is_none() {
                return Err(Error::InvalidPartition(part.clone()));
            }
        }
        let nodes = self.resolve_node_set(&req, cluster)?;

        let name = match req.name {
            Some(n) => {
                if self.by_name.contains_key(&n) {
                    return Err(Error::ReservationNameDup(n));
                }
                n
            }
            None => self.generate_name(&req.accounts, &req.users),
        };

        let resv = Reservation {
            name: name.clone(),
            start,
            end,
            accounts: req.accounts,
            users: req.users,
            nodes,
            required_features: req.required_features,
            partition: req.partition,
            kind: req.kind.unwrap_or(ReservationType::User),
        };
        info!(name = %resv.name, start, end, "reservation created");
        self.by_name.insert(name.clone(), resv);
        Ok(name)
    }

    /// Applies the given fields over an existing reservation, replacing
    /// the node bitmap atomically when a new node list is supplied.
    pub fn update(&mut self, name: &str, req: ReservationRequest, cluster: &ClusterConfig) -> Result<()> {
        let resv = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("reservation {name}")))?;

        if let Some(start) = req.start {
            resv.start = start;
        }
        if let Some(duration) = req.duration_s {
            resv.end = resv.start + duration;
        } else if let Some(end) = req.end {
            resv.end = end;
        }
        if !req.accounts.is_empty() {
            resv.accounts = req.accounts;
        }
        if !req.users.is_empty() {
            resv.users = req.users;
        }
        if !req.required_features.is_empty() {
            resv.required_features = req.required_features;
        }
        if let Some(part) = req.partition {
            if cluster.partition_by_name(&part).is_none() {
                return Err(Error::InvalidPartition(part));
            }
            resv.partition = Some(part);
        }
        if req.all_nodes || req.node_names.is_some() {
            let new_nodes = self.resolve_node_set(&req, cluster)?;
            self.by_name.get_mut(name).unwrap().nodes = new_nodes;
        }
        debug!(name, "reservation updated");
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.by_name
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("reservation {name}")))
    }

    /// All reservations active at `now` that cover `node`, used by
    /// selectors to build the non-reserved-or-permitted candidate mask.
    pub fn covering(&self, node: usize, cluster_node_count: usize, now: u64) -> impl Iterator<Item = &Reservation> {
        self.by_name
            .values()
            .filter(move |r| r.is_active_at(now) && r.nodes.contains(node, cluster_node_count))
    }

    fn resolve_node_set(&self, req: &ReservationRequest, cluster: &ClusterConfig) -> Result<NodeSet> {
        if req.all_nodes {
            return Ok(NodeSet::All);
        }
        let Some(names) = &req.node_names else {
            return Ok(NodeSet::All);
        };
        let mut bitmap = fixedbitset::FixedBitSet::with_capacity(cluster.node_count());
        for name in names {
            let node = cluster
                .node_by_name(name)
                .ok_or_else(|| Error::InvalidNodeName(name.clone()))?;
            bitmap.insert(node.id as usize);
        }
        Ok(NodeSet::Explicit(bitmap))
    }

    /// Prefix of the first permitted account (or user if none), joined
    /// with the minimal non-negative integer suffix unique among live
    /// reservation names.
    fn generate_name(&self, accounts: &[String], users: &[String]) -> String {
        let prefix = accounts
            .first()
            .or_else(|| users.first())
            .cloned()
            .unwrap_or_else(|| "resv".to_string());

        let mut suffix = 0u64;
        loop {
            let candidate = format!("{prefix}_{suffix}");
            if !self.by_name.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cluster_with_nodes(names: &[&str]) -> ClusterConfig {
        let mut yaml = String::from("nodes:\n");
        for name in names {
            yaml.push_str(&format!("  {name}:\n    real_memory_mb: 1024\n"));
        }
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        let mut cfg = ClusterConfig::new();
        cfg.load_from_file(f.path()).unwrap();
        cfg
    }

    fn base_req() -> ReservationRequest {
        ReservationRequest {
            accounts: vec!["alice".into()],
            start: Some(1_000),
            duration_s: Some(3600),
            ..Default::default()
        }
    }

    #[test]
    fn create_rejects_start_too_far_in_past() {
        let cluster = cluster_with_nodes(&["n0"]);
        let mut mgr = ReservationManager::new();
        let mut req = base_req();
        req.start = Some(0);
        let err = mgr.create(req, &cluster, 1_000_000);
        assert!(matches!(err, Err(Error::InvalidTimeValue(_))));
    }

    #[test]
    fn create_rejects_no_principal() {
        let cluster = cluster_with_nodes(&["n0"]);
        let mut mgr = ReservationManager::new();
        let req = ReservationRequest {
            start: Some(1000),
            duration_s: Some(60),
            ..Default::default()
        };
        assert!(mgr.create(req, &cluster, 1000).is_err());
    }

    #[test]
    fn name_generation_fills_next_unused_integer() {
        let cluster = cluster_with_nodes(&["n0"]);
        let mut mgr = ReservationManager::new();

        let mut req1 = base_req();
        req1.name = Some("alice_0".into());
        mgr.create(req1, &cluster, 1000).unwrap();

        let mut req2 = base_req();
        req2.name = Some("alice_1".into());
        mgr.create(req2, &cluster, 1000).unwrap();

        let mut req3 = base_req();
        req3.accounts = vec!["alice".into(), "bob".into()];
        let name = mgr.create(req3, &cluster, 1000).unwrap();
        assert_eq!(name, "alice_2");
    }

    #[test]
    fn update_replaces_node_bitmap_atomically() {
        let cluster = cluster_with_nodes(&["n0", "n1"]);
        let mut mgr = ReservationManager::new();
        let mut req = base_req();
        req.node_names = Some(vec!["n0".into()]);
        let name = mgr.create(req, &cluster, 1000).unwrap();

        let update_req = ReservationRequest {
            node_names: Some(vec!["n1".into()]),
            ..Default::default()
        };
        mgr.update(&name, update_req, &cluster).unwrap();

        let resv = mgr.get(&name).unwrap();
        match &resv.nodes {
            NodeSet::Explicit(bitmap) => {
                assert!(!bitmap.contains(0));
                assert!(bitmap.contains(1));
            }
            NodeSet::All => panic!("expected explicit set"),
        }
    }

    #[test]
    fn unknown_partition_is_rejected() {
        let cluster = cluster_with_nodes(&["n0"]);
        let mut mgr = ReservationManager::new();
        let mut req = base_req();
        req.partition = Some("ghost".into());
        assert!(matches!(mgr.create(req, &cluster, 1000), Err(Error::InvalidPartition(_))));
    }
}
