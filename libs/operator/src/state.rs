use crate::crd::nodeclaim::NodeClaim;
use crate::{CAPACITY_TYPE_LABEL, POOL_NAME_LABEL};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};

/// Key under which a StateNode is indexed: the provider ID once the claim is
/// fulfilled, the claim name before that. An entry migrates from the
/// claim-name key to the provider-ID key exactly once, when the provider ID
/// is first observed.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum StateKey {
    Provider(String),
    Claim(String),
}

/// Which per-pool counter a StateNode currently occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Running,
    Deleting,
    Nominated,
}

/// Per-pool counter triple. `running + deleting + nominated` equals the
/// number of StateNodes carrying that pool's label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub running: usize,
    pub deleting: usize,
    pub nominated: usize,
}

/// A node claim paired with the Node it produced, as far as the watches have
/// told us. Exists while at least one of the two objects is known.
#[derive(Clone, Debug, Default)]
pub struct StateNode {
    pub claim: Option<Arc<NodeClaim>>,
    pub node: Option<Arc<Node>>,
    /// A delete for the claim has been issued (by this controller or a peer)
    /// and the watch has not yet observed the object disappearing.
    pub marked_for_deletion: bool,
    /// Set by the provisioning controller when pending pods have been
    /// nominated onto this node.
    pub nominated_until: Option<DateTime<Utc>>,
}

impl StateNode {
    pub fn provider_id(&self) -> Option<&str> {
        self.claim
            .as_deref()
            .and_then(NodeClaim::provider_id)
            .or_else(|| self.node.as_ref()?.spec.as_ref()?.provider_id.as_deref())
    }

    pub fn claim_name(&self) -> Option<String> {
        self.claim.as_ref().map(|c| c.name_any())
    }

    pub fn node_name(&self) -> Option<String> {
        self.node.as_ref().map(|n| n.name_any())
    }

    /// Owning pool, from the claim label or its mirror on the node.
    pub fn pool_name(&self) -> Option<String> {
        self.claim
            .as_deref()
            .and_then(NodeClaim::pool_name)
            .map(str::to_string)
            .or_else(|| {
                self.node
                    .as_ref()?
                    .meta()
                    .labels
                    .as_ref()?
                    .get(POOL_NAME_LABEL)
                    .cloned()
            })
    }

    /// Whether the claim reports its node as initialized.
    pub fn is_initialized(&self) -> bool {
        self.claim.as_deref().is_some_and(NodeClaim::is_initialized)
    }

    /// Capacity type of the backing node, from the mirrored label.
    pub fn capacity_type(&self) -> Option<String> {
        self.node
            .as_ref()?
            .meta()
            .labels
            .as_ref()?
            .get(CAPACITY_TYPE_LABEL)
            .cloned()
    }

    /// Whether this node still counts toward the pool's running total: a
    /// bound claim that nobody has started tearing down.
    pub fn is_active(&self) -> bool {
        match &self.claim {
            Some(claim) => !self.marked_for_deletion && !claim.is_terminating(),
            None => false,
        }
    }

    /// Pods bound to this node, listed live through the API. Pods are never
    /// cached: their churn dwarfs node churn and the reconcile fan-out is
    /// bounded by the pool size.
    pub async fn pods(&self, client: Client) -> kube::Result<Vec<Pod>> {
        let Some(node_name) = self.node_name() else {
            return Ok(Vec::new());
        };
        let pods: Api<Pod> = Api::all(client);
        let lp = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(pods.list(&lp).await?.items)
    }

    fn tag(&self) -> Option<(String, Slot)> {
        let pool = self.pool_name()?;
        let slot = if self.marked_for_deletion
            || self.claim.as_deref().is_some_and(NodeClaim::is_terminating)
        {
            Slot::Deleting
        } else if self.nominated_until.is_some() {
            Slot::Nominated
        } else {
            Slot::Running
        };
        Some((pool, slot))
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<StateKey, StateNode>,
    by_claim: HashMap<String, StateKey>,
    by_node: HashMap<String, StateKey>,
    pools: HashMap<String, PoolCounters>,
    daemon_sets: HashSet<String>,
}

impl Inner {
    fn count(&mut self, tag: Option<(String, Slot)>) {
        if let Some((pool, slot)) = tag {
            let counters = self.pools.entry(pool).or_default();
            match slot {
                Slot::Running => counters.running += 1,
                Slot::Deleting => counters.deleting += 1,
                Slot::Nominated => counters.nominated += 1,
            }
        }
    }

    fn uncount(&mut self, tag: Option<(String, Slot)>) {
        if let Some((pool, slot)) = tag {
            if let Some(counters) = self.pools.get_mut(&pool) {
                match slot {
                    Slot::Running => counters.running = counters.running.saturating_sub(1),
                    Slot::Deleting => counters.deleting = counters.deleting.saturating_sub(1),
                    Slot::Nominated => counters.nominated = counters.nominated.saturating_sub(1),
                }
                if *counters == PoolCounters::default() {
                    self.pools.remove(&pool);
                }
            }
        }
    }
}

/// In-memory index of node claims, nodes and per-pool counters, fed from the
/// claim/node/daemonset watches. Writers take the lock per event; readers get
/// cloned snapshots and never see a half-applied mutation. The lock is never
/// held across an await point.
#[derive(Default)]
pub struct ClusterState {
    inner: RwLock<Inner>,
}

impl ClusterState {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("state lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("state lock poisoned")
    }

    /// Record a claim from the watch. Returns true when the claim was not
    /// known before, i.e. on the create edge.
    pub fn apply_claim(&self, claim: &NodeClaim) -> bool {
        let name = claim.name_any();
        let mut inner = self.write();
        let created = !inner.by_claim.contains_key(&name);

        let old_key = inner.by_claim.get(&name).cloned();
        let new_key = match (claim.provider_id(), &old_key) {
            (Some(pid), _) => StateKey::Provider(pid.to_string()),
            (None, Some(key)) => key.clone(),
            (None, None) => StateKey::Claim(name.clone()),
        };

        // A claim that just gained its provider ID migrates off the
        // claim-name key; whatever the old entry accumulated is folded into
        // the provider-ID entry (which may already hold the node).
        let mut carried = StateNode::default();
        if let Some(old) = old_key.filter(|k| *k != new_key) {
            if let Some(prev) = inner.nodes.remove(&old) {
                inner.uncount(prev.tag());
                carried = prev;
            }
        }

        let mut entry = match inner.nodes.remove(&new_key) {
            Some(existing) => {
                inner.uncount(existing.tag());
                existing
            }
            None => StateNode::default(),
        };
        entry.claim = Some(Arc::new(claim.clone()));
        entry.node = entry.node.or(carried.node);
        entry.marked_for_deletion = entry.marked_for_deletion || carried.marked_for_deletion;
        entry.nominated_until = entry.nominated_until.or(carried.nominated_until);

        inner.count(entry.tag());
        if let Some(node_name) = entry.node_name() {
            inner.by_node.insert(node_name, new_key.clone());
        }
        inner.by_claim.insert(name, new_key.clone());
        inner.nodes.insert(new_key, entry);
        created
    }

    /// Drop a claim after the watch observed its deletion. The deletion mark
    /// is cleared with it; a node still registered keeps a claimless entry
    /// until its own delete event arrives.
    pub fn delete_claim(&self, name: &str) {
        let mut inner = self.write();
        let Some(key) = inner.by_claim.remove(name) else {
            return;
        };
        let Some(mut entry) = inner.nodes.remove(&key) else {
            return;
        };
        inner.uncount(entry.tag());
        entry.claim = None;
        entry.marked_for_deletion = false;
        if entry.node.is_some() {
            inner.count(entry.tag());
            inner.nodes.insert(key, entry);
        }
    }

    pub fn apply_node(&self, node: &Node) {
        let Some(pid) = node.spec.as_ref().and_then(|s| s.provider_id.clone()) else {
            // nothing to join on yet; the node is reobserved once the
            // provider ID is set
            return;
        };
        let name = node.name_any();
        let mut inner = self.write();
        let key = StateKey::Provider(pid);
        let mut entry = match inner.nodes.remove(&key) {
            Some(existing) => {
                inner.uncount(existing.tag());
                existing
            }
            None => StateNode::default(),
        };
        entry.node = Some(Arc::new(node.clone()));
        inner.count(entry.tag());
        inner.by_node.insert(name, key.clone());
        inner.nodes.insert(key, entry);
    }

    pub fn delete_node(&self, name: &str) {
        let mut inner = self.write();
        let Some(key) = inner.by_node.remove(name) else {
            return;
        };
        let Some(mut entry) = inner.nodes.remove(&key) else {
            return;
        };
        inner.uncount(entry.tag());
        entry.node = None;
        if entry.claim.is_some() {
            inner.count(entry.tag());
            inner.nodes.insert(key, entry);
        }
    }

    pub fn apply_daemon_set(&self, ds: &DaemonSet) {
        let key = format!("{}/{}", ds.namespace().unwrap_or_default(), ds.name_any());
        self.write().daemon_sets.insert(key);
    }

    pub fn delete_daemon_set(&self, ds: &DaemonSet) {
        let key = format!("{}/{}", ds.namespace().unwrap_or_default(), ds.name_any());
        self.write().daemon_sets.remove(&key);
    }

    /// Whether a DaemonSet with this namespace/name is currently known. Pod
    /// owner references are only trusted when the referenced DaemonSet still
    /// exists.
    pub fn has_daemon_set(&self, namespace: &str, name: &str) -> bool {
        self.read().daemon_sets.contains(&format!("{namespace}/{name}"))
    }

    /// Record that a delete has been issued for the claim behind this
    /// provider ID. Idempotent; repeated marks are harmless. Returns false
    /// when no such node is tracked.
    pub fn mark_for_deletion(&self, provider_id: &str) -> bool {
        let mut inner = self.write();
        let key = StateKey::Provider(provider_id.to_string());
        match inner.nodes.remove(&key) {
            Some(mut entry) => {
                if !entry.marked_for_deletion {
                    inner.uncount(entry.tag());
                    entry.marked_for_deletion = true;
                    inner.count(entry.tag());
                }
                inner.nodes.insert(key, entry);
                true
            }
            None => false,
        }
    }

    /// Record a nomination from the provisioning controller.
    pub fn nominate(&self, provider_id: &str, until: DateTime<Utc>) -> bool {
        let mut inner = self.write();
        let key = StateKey::Provider(provider_id.to_string());
        match inner.nodes.remove(&key) {
            Some(mut entry) => {
                inner.uncount(entry.tag());
                entry.nominated_until = Some(until);
                inner.count(entry.tag());
                inner.nodes.insert(key, entry);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every tracked node.
    pub fn nodes(&self) -> Vec<StateNode> {
        self.read().nodes.values().cloned().collect()
    }

    /// Snapshot of the pool's claimed nodes, sorted by claim name so callers
    /// get a reproducible iteration order. Claimless (node-only) entries are
    /// transient and excluded.
    pub fn pool_nodes(&self, pool: &str) -> Vec<StateNode> {
        let mut nodes: Vec<StateNode> = self
            .read()
            .nodes
            .values()
            .filter(|n| n.claim.is_some() && n.pool_name().as_deref() == Some(pool))
            .cloned()
            .collect();
        nodes.sort_by_key(StateNode::claim_name);
        nodes
    }

    pub fn pool_counts(&self, pool: &str) -> PoolCounters {
        self.read().pools.get(pool).copied().unwrap_or_default()
    }

    /// Drop claims the given re-list did not contain.
    pub fn retain_claims(&self, seen: &HashSet<String>) {
        let stale: Vec<String> = {
            let inner = self.read();
            inner
                .by_claim
                .keys()
                .filter(|name| !seen.contains(*name))
                .cloned()
                .collect()
        };
        for name in stale {
            self.delete_claim(&name);
        }
    }

    /// Drop nodes the given re-list did not contain.
    pub fn retain_nodes(&self, seen: &HashSet<String>) {
        let stale: Vec<String> = {
            let inner = self.read();
            inner
                .by_node
                .keys()
                .filter(|name| !seen.contains(*name))
                .cloned()
                .collect()
        };
        for name in stale {
            self.delete_node(&name);
        }
    }

    /// Drop daemonsets the given re-list did not contain (keys are
    /// `namespace/name`).
    pub fn retain_daemon_sets(&self, seen: &HashSet<String>) {
        self.write().daemon_sets.retain(|key| seen.contains(key));
    }

    /// Full invalidation, for callers rebuilding from a fresh list.
    pub fn reset(&self) {
        *self.write() = Inner::default();
    }
}
