//! Association record and the per-job limits resolved from it.

use serde::{Deserialize, Serialize};

pub type AssocId = u32;

/// Per-job limits that participate in upward inheritance in
/// [`super::AssociationTree::resolve_effective_limits`]. Each field is
/// `None` when unset on a given row, meaning "inherit from the nearest
/// ancestor that sets it".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InheritableLimits {
    pub max_jobs: Option<u64>,
    pub max_submit_jobs: Option<u64>,
    pub max_cpus_per_job: Option<u64>,
    pub max_nodes_per_job: Option<u64>,
    pub max_wall_per_job_s: Option<u64>,
    pub max_cpu_mins_per_job: Option<u64>,
    pub qos_list: Option<Vec<String>>,
}

impl InheritableLimits {
    /// `true` if every inheritable field is set — a fully-resolved row
    /// that can short-circuit the upward walk.
    pub fn fully_set(&self) -> bool {
        self.max_jobs.is_some()
            && self.max_submit_jobs.is_some()
            && self.max_cpus_per_job.is_some()
            && self.max_nodes_per_job.is_some()
            && self.max_wall_per_job_s.is_some()
            && self.max_cpu_mins_per_job.is_some()
            && self.qos_list.is_some()
    }

    /// Fill every still-unset field in `self` from `ancestor`.
    fn inherit_from(&mut self, ancestor: &InheritableLimits) {
        if self.max_jobs.is_none() {
            self.max_jobs = ancestor.max_jobs;
        }
        if self.max_submit_jobs.is_none() {
            self.max_submit_jobs = ancestor.max_submit_jobs;
        }
        if self.max_cpus_per_job.is_none() {
            self.max_cpus_per_job = ancestor.max_cpus_per_job;
        }
        if self.max_nodes_per_job.is_none() {
            self.max_nodes_per_job = ancestor.max_nodes_per_job;
        }
        if self.max_wall_per_job_s.is_none() {
            self.max_wall_per_job_s = ancestor.max_wall_per_job_s;
        }
        if self.max_cpu_mins_per_job.is_none() {
            self.max_cpu_mins_per_job = ancestor.max_cpu_mins_per_job;
        }
        if self.qos_list.is_none() {
            self.qos_list = ancestor.qos_list.clone();
        }
    }
}

/// Group (account-wide) limits. Not part of the inheritance walk — each
/// row carries its own, enforced independently at whatever level a job
/// resolves to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupLimits {
    pub group_jobs: Option<u64>,
    pub group_cpus: Option<u64>,
    pub group_nodes: Option<u64>,
    pub group_submitted: Option<u64>,
    pub group_wall_s: Option<u64>,
    pub group_cpu_hours: Option<u64>,
}

/// A node in the nested-set association tree, keyed by (cluster,
/// account, user, partition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    pub id: AssocId,
    pub cluster: String,
    pub account: String,
    pub parent_account: Option<String>,
    /// `None` for an account-level row; `Some(user)` for a user row.
    pub user: Option<String>,
    pub partition: Option<String>,

    pub fairshare_weight: u32,
    pub group: GroupLimits,
    pub limits: InheritableLimits,

    pub parent_id: Option<AssocId>,
    pub lft: u32,
    pub rgt: u32,
    pub deleted: bool,
}

impl Association {
    /// Key tuple used for duplicate detection on `add`.
    pub fn key(&self) -> (&str, &str, Option<&str>, Option<&str>) {
        (
            self.cluster.as_str(),
            self.account.as_str(),
            self.user.as_deref(),
            self.partition.as_deref(),
        )
    }

    /// `true` if this row is a user row (leaf-level, carries a user
    /// name) rather than an account row.
    pub fn is_user_row(&self) -> bool {
        self.user.is_some()
    }
}

/// Result of [`super::AssociationTree::resolve_effective_limits`]: an
/// owned snapshot so callers can cache it against a job without holding
/// a borrow into the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedLimits {
    pub limits: InheritableLimits,
}

pub(super) fn resolve_walk(
    mut limits: InheritableLimits,
    ancestors: impl Iterator<Item = InheritableLimits>,
) -> InheritableLimits {
    if limits.fully_set() {
        return limits;
    }
    for ancestor in ancestors {
        limits.inherit_from(&ancestor);
        if limits.fully_set() {
            break;
        }
    }
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_set_requires_every_field() {
        let mut l = InheritableLimits::default();
        assert!(!l.fully_set());
        l.max_jobs = Some(1);
        l.max_submit_jobs = Some(1);
        l.max_cpus_per_job = Some(1);
        l.max_nodes_per_job = Some(1);
        l.max_wall_per_job_s = Some(1);
        l.max_cpu_mins_per_job = Some(1);
        assert!(!l.fully_set(), "qos_list still unset");
        l.qos_list = Some(vec![]);
        assert!(l.fully_set());
    }

    #[test]
    fn inherit_from_only_fills_unset_fields() {
        let mut child = InheritableLimits {
            max_jobs: Some(5),
            ..Default::default()
        };
        let parent = InheritableLimits {
            max_jobs: Some(99),
            max_submit_jobs: Some(10),
            ..Default::default()
        };
        child.inherit_from(&parent);
        assert_eq!(child.max_jobs, Some(5), "already-set field untouched");
        assert_eq!(child.max_submit_jobs, Some(10), "unset field inherited");
        assert_eq!(child.max_cpus_per_job, None);
    }

    #[test]
    fn resolve_walk_short_circuits_on_account_row_with_nothing_unset() {
        let mut full = InheritableLimits::default();
        full.max_jobs = Some(1);
        full.max_submit_jobs = Some(1);
        full.max_cpus_per_job = Some(1);
        full.max_nodes_per_job = Some(1);
        full.max_wall_per_job_s = Some(1);
        full.max_cpu_mins_per_job = Some(1);
        full.qos_list = Some(vec!["normal".into()]);

        // An ancestor iterator that would panic if consumed confirms the
        // short-circuit: we never call .next() on it.
        let poison = std::iter::from_fn(|| panic!("ancestors should not be walked"));
        let resolved = resolve_walk(full.clone(), poison);
        assert_eq!(resolved.max_jobs, full.max_jobs);
    }
}
