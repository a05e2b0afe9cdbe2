//! Hierarchical accounting association tree.
//!
//! Associations form a nested-set tree per cluster: cluster -> root
//! account -> sub-accounts -> user associations, each optionally scoped
//! to a partition. `lft`/`rgt` labels (Celko-style nested sets) mirror
//! the layout the accounting storage backend keeps in SQL so that
//! "all descendants of X" is a single contiguous range scan instead of a
//! recursive walk.

mod types;

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub use types::{AssocId, Association, GroupLimits, InheritableLimits, ResolvedLimits};

/// The association tree plus a by-id index.
///
/// `lft`/`rgt` are maintained on every structural change (`add`, `mv`,
/// `remove`) so that `descendants_of` and `path_to_root` never need to
/// recurse through `parent_id` pointers.
#[derive(Debug, Default)]
pub struct AssociationTree {
    by_id: HashMap<AssocId, Association>,
    next_id: AssocId,
}

impl AssociationTree {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: AssocId) -> Option<&Association> {
        self.by_id.get(&id)
    }

    /// Insert a new association as a child of `parent_id` (`None` for a
    /// cluster root). Rejects a duplicate (cluster, account, user,
    /// partition) key.
    #[instrument(skip(self), fields(account = %account, user = ?user))]
    pub fn add(
        &mut self,
        cluster: &str,
        account: &str,
        user: Option<&str>,
        partition: Option<&str>,
        parent_id: Option<AssocId>,
    ) -> Result<AssocId> {
        let key = (cluster, account, user, partition);
        if self
            .by_id
            .values()
            .any(|a| !a.deleted && a.key() == key)
        {
            return Err(Error::AlreadyExists {
                what: format!("association {cluster}/{account}/{user:?}/{partition:?}"),
            });
        }
        if let Some(pid) = parent_id {
            if !self.by_id.contains_key(&pid) {
                return Err(Error::not_found(format!("parent association {pid}")));
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        let parent_account = parent_id.and_then(|pid| self.by_id.get(&pid)).map(|p| p.account.clone());

        let assoc = Association {
            id,
            cluster: cluster.to_string(),
            account: account.to_string(),
            parent_account,
            user: user.map(str::to_string),
            partition: partition.map(str::to_string),
            fairshare_weight: 1,
            group: GroupLimits::default(),
            limits: InheritableLimits::default(),
            parent_id,
            lft: 0,
            rgt: 0,
            deleted: false,
        };
        self.by_id.insert(id, assoc);
        self.relabel(cluster);
        debug!(id, "association added");
        Ok(id)
    }

    /// Overwrite the mutable fields (limits, group caps, fairshare
    /// weight) of an existing association. Structural fields (parent,
    /// key) are untouched here — use [`Self::mv`] to reparent.
    pub fn modify(
        &mut self,
        id: AssocId,
        f: impl FnOnce(&mut Association),
    ) -> Result<()> {
        let assoc = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("association {id}")))?;
        f(assoc);
        Ok(())
    }

    /// Reparent `id` under `new_parent_id`. If `new_parent_id` is one of
    /// `id`'s own descendants, that descendant is first promoted to
    /// `id`'s original parent (so the subtree stays connected and
    /// acyclic) before `id` is reparented under it.
    #[instrument(skip(self))]
    pub fn mv(&mut self, id: AssocId, new_parent_id: AssocId) -> Result<()> {
        if id == new_parent_id {
            return Err(Error::ReservationInvalid(
                "association cannot be its own parent".into(),
            ));
        }
        let (lft, rgt, original_parent_id) = {
            let a = self
                .by_id
                .get(&id)
                .ok_or_else(|| Error::not_found(format!("association {id}")))?;
            (a.lft, a.rgt, a.parent_id)
        };
        let new_parent = self
            .by_id
            .get(&new_parent_id)
            .ok_or_else(|| Error::not_found(format!("association {new_parent_id}")))?;
        let new_parent_is_descendant = new_parent.lft >= lft && new_parent.rgt <= rgt;

        let cluster = self.by_id[&id].cluster.clone();
        if new_parent_is_descendant {
            debug!(
                id,
                new_parent_id,
                "new parent is a descendant, promoting it to the original parent first"
            );
            self.by_id.get_mut(&new_parent_id).unwrap().parent_id = original_parent_id;
        }
        self.by_id.get_mut(&id).unwrap().parent_id = Some(new_parent_id);
        self.relabel(&cluster);
        Ok(())
    }

    /// Soft-delete `id` and every descendant (deletion cascades down the
    /// subtree). Returns an error if any association in the subtree
    /// still has running jobs — checked by the caller passing
    /// `has_jobs`.
    pub fn remove(
        &mut self,
        id: AssocId,
        has_jobs: impl Fn(AssocId) -> bool,
    ) -> Result<Vec<AssocId>> {
        let (lft, rgt, cluster) = {
            let a = self
                .by_id
                .get(&id)
                .ok_or_else(|| Error::not_found(format!("association {id}")))?;
            (a.lft, a.rgt, a.cluster.clone())
        };
        let subtree: Vec<AssocId> = self
            .by_id
            .values()
            .filter(|a| a.cluster == cluster && a.lft >= lft && a.rgt <= rgt && !a.deleted)
            .map(|a| a.id)
            .collect();

        if let Some(blocked) = subtree.iter().find(|&&aid| has_jobs(aid)) {
            return Err(Error::HasJobs {
                what: format!("association {blocked}"),
            });
        }

        for &aid in &subtree {
            self.by_id.get_mut(&aid).unwrap().deleted = true;
        }
        Ok(subtree)
    }

    /// Walk from `id` up to the cluster root, resolving every
    /// inheritable limit field. Stops early once
    /// every field is set.
    pub fn resolve_effective_limits(&self, id: AssocId) -> Result<ResolvedLimits> {
        let start = self
            .by_id
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("association {id}")))?;
        let ancestors = self.path_to_root(start.parent_id).into_iter().map(|a| a.limits.clone());
        let limits = types::resolve_walk(start.limits.clone(), ancestors);
        Ok(ResolvedLimits { limits })
    }

    /// All live descendants of `id`, via the lft/rgt range (does not
    /// include `id` itself).
    pub fn descendants_of(&self, id: AssocId) -> Vec<&Association> {
        let Some(a) = self.by_id.get(&id) else {
            return Vec::new();
        };
        self.by_id
            .values()
            .filter(|d| !d.deleted && d.cluster == a.cluster && d.lft > a.lft && d.rgt < a.rgt)
            .collect()
    }

    fn path_to_root(&self, mut parent_id: Option<AssocId>) -> Vec<&Association> {
        let mut path = Vec::new();
        while let Some(pid) = parent_id {
            let Some(p) = self.by_id.get(&pid) else { break };
            path.push(p);
            parent_id = p.parent_id;
        }
        path
    }

    /// Recompute lft/rgt for every association in `cluster` via a
    /// pre-order DFS, mirroring the renumbering the SQL backend does on
    /// every structural change (accounting_storage_mysql.c).
    fn relabel(&mut self, cluster: &str) {
        let roots: Vec<AssocId> = self
            .by_id
            .values()
            .filter(|a| a.cluster == cluster && a.parent_id.is_none())
            .map(|a| a.id)
            .collect();

        let mut children: HashMap<AssocId, Vec<AssocId>> = HashMap::new();
        for a in self.by_id.values() {
            if a.cluster == cluster {
                if let Some(pid) = a.parent_id {
                    children.entry(pid).or_default().push(a.id);
                }
            }
        }

        let mut counter = 1u32;
        // Iterative pre-order DFS: a `true` marker means "children already
        // pushed, close this node on pop" so rgt is assigned after the
        // whole subtree has been visited.
        let mut visit_stack: Vec<(AssocId, bool)> =
            roots.into_iter().rev().map(|id| (id, false)).collect();
        while let Some((id, entered)) = visit_stack.pop() {
            if entered {
                self.by_id.get_mut(&id).unwrap().rgt = counter;
                counter += 1;
                continue;
            }
            self.by_id.get_mut(&id).unwrap().lft = counter;
            counter += 1;
            visit_stack.push((id, true));
            if let Some(kids) = children.get(&id) {
                for &kid in kids.iter().rev() {
                    visit_stack.push((kid, false));
                }
            }
        }
    }
}
