//! Binary snapshot/restore of reservation state.
//!
//! `dump_state` writes to a temp file in the same directory, fsyncs,
//! then performs the three-step rename (current → old, new → current)
//! so a crash mid-write never corrupts the live snapshot — the old
//! snapshot is only replaced after the new one is durably on disk.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ClusterConfig;

use super::types::{NodeSet, Reservation, ReservationType};

const VERSION_TAG: &str = "gridctld-resv-v1";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedHeader {
    version_tag: String,
    timestamp: u64,
    record_count: u32,
}

/// Field order is part of the on-disk format; changing it breaks
/// compatibility with existing snapshots.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    accounts: String,
    end_time: u64,
    features: String,
    name: String,
    node_cnt: u32,
    node_list: String,
    partition: String,
    start_time: u64,
    r#type: u16,
    users: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    header: PersistedHeader,
    records: Vec<PersistedRecord>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn to_record(resv: &Reservation, cluster: &ClusterConfig) -> PersistedRecord {
    let (node_list, node_cnt) = match &resv.nodes {
        NodeSet::All => ("ALL".to_string(), cluster.node_count() as u32),
        NodeSet::Explicit(bitmap) => {
            let names: Vec<&str> = bitmap
                .ones()
                .filter_map(|idx| cluster.node(idx as crate::model::NodeId))
                .map(|n| n.name.as_str())
                .collect();
            (names.join(","), bitmap.count_ones(..) as u32)
        }
    };
    PersistedRecord {
        accounts: resv.accounts.join(","),
        end_time: resv.end,
        features: resv.required_features.join(","),
        name: resv.name.clone(),
        node_cnt,
        node_list,
        partition: resv.partition.clone().unwrap_or_default(),
        start_time: resv.start,
        r#type: resv.kind.as_u16(),
        users: resv.users.join(","),
    }
}

fn from_record(rec: PersistedRecord, cluster: &ClusterConfig) -> Reservation {
    let nodes = if rec.node_list == "ALL" {
        NodeSet::All
    } else {
        let mut bitmap = fixedbitset::FixedBitSet::with_capacity(cluster.node_count());
        for name in rec.node_list.split(',').filter(|s| !s.is_empty()) {
            if let Some(n) = cluster.node_by_name(name) {
                bitmap.insert(n.id as usize);
            }
        }
        NodeSet::Explicit(bitmap)
    };
    Reservation {
        name: rec.name,
        start: rec.start_time,
        end: rec.end_time,
        accounts: split_csv(&rec.accounts),
        users: split_csv(&rec.users),
        nodes,
        required_features: split_csv(&rec.features),
        partition: (!rec.partition.is_empty()).then_some(rec.partition),
        kind: ReservationType::from_u16(rec.r#type),
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect()
}

/// Writes every reservation whose `end > now` (vestigial records
/// the source keeps vestigial records past their end time, this
/// implementation purges them on every dump).
pub fn dump_state(path: &Path, reservations: &[Reservation], cluster: &ClusterConfig) -> Result<()> {
    let now = now_unix();
    let records: Vec<PersistedRecord> = reservations
        .iter()
        .filter(|r| r.end > now)
        .map(|r| to_record(r, cluster))
        .collect();

    let snapshot = PersistedSnapshot {
        header: PersistedHeader {
            version_tag: VERSION_TAG.to_string(),
            timestamp: now,
            record_count: records.len() as u32,
        },
        records,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path: PathBuf = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("resv_state")
    ));

    let bytes = bincode::serialize(&snapshot).context("serializing reservation snapshot")?;
    {
        let mut f = File::create(&tmp_path)
            .with_context(|| format!("creating temp snapshot {}", tmp_path.display()))?;
        f.write_all(&bytes).context("writing reservation snapshot")?;
        f.sync_all().context("fsyncing reservation snapshot")?;
    }

    if path.exists() {
        let old_path = dir.join(format!(
            "{}.old",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("resv_state")
        ));
        fs::rename(path, &old_path).context("rotating previous snapshot to .old")?;
    }
    fs::rename(&tmp_path, path).context("renaming new snapshot into place")?;

    info!(records = snapshot.header.record_count, path = %path.display(), "reservation state dumped");
    Ok(())
}

/// Tolerates a missing file, returning an empty reservation list.
pub fn load_state(path: &Path, cluster: &ClusterConfig) -> Result<Vec<Reservation>> {
    if !path.exists() {
        warn!(path = %path.display(), "no reservation snapshot found, starting empty");
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot: PersistedSnapshot =
        bincode::deserialize(&bytes).context("deserializing reservation snapshot")?;
    Ok(snapshot
        .records
        .into_iter()
        .map(|r| from_record(r, cluster))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use std::io::Write as _;
    use tempfile::{tempdir, NamedTempFile};

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

    #[test]
    fn dump_then_load_round_trips_records() {
        let cluster = cluster_with_nodes(&["n0", "n1"]);
        let mut bitmap = fixedbitset::FixedBitSet::with_capacity(2);
        bitmap.insert(0);
        let resv = Reservation {
            name: "alice_0".into(),
            start: 1000,
            end: 9_999_999_999,
            accounts: vec!["alice".into()],
            users: vec![],
            nodes: NodeSet::Explicit(bitmap),
            required_features: vec![],
            partition: None,
            kind: ReservationType::User,
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("resv_state");
        dump_state(&path, &[resv], &cluster).unwrap();

        let loaded = load_state(&path, &cluster).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "alice_0");
        assert_eq!(loaded[0].accounts, vec!["alice".to_string()]);
        match &loaded[0].nodes {
            NodeSet::Explicit(b) => assert!(b.contains(0)),
            NodeSet::All => panic!("expected explicit node set"),
        }
    }

    #[test]
    fn dump_purges_expired_reservations() {
        let cluster = cluster_with_nodes(&["n0"]);
        let expired = Reservation {
            name: "old_0".into(),
            start: 0,
            end: 1,
            accounts: vec!["bob".into()],
            users: vec![],
            nodes: NodeSet::All,
            required_features: vec![],
            partition: None,
            kind: ReservationType::User,
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("resv_state");
        dump_state(&path, &[expired], &cluster).unwrap();

        let loaded = load_state(&path, &cluster).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let cluster = cluster_with_nodes(&["n0"]);
        let loaded = load_state(Path::new("/nonexistent/resv_state"), &cluster).unwrap();
        assert!(loaded.is_empty());
    }
}
