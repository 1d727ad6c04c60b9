use crate::crd::nodeclaim::NodeClaim;
use crate::crd::nodepool::NodePool;
use crate::nodeclass::NodeClassCatalog;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use kube::runtime::reflector::{ObjectRef, Store};

/// Revision of the only pool field whose change can move the over-provision
/// delta. Used with `predicate_filter` so pool updates only reach the
/// reconciler when `spec.replicas` changed; an absent count and an explicit
/// zero hash differently.
pub fn replicas_revision(pool: &NodePool) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    pool.spec.replicas.hash(&mut hasher);
    Some(hasher.finish())
}

/// Maps a newly observed claim to its owning pool key. A fresh claim may
/// already over-provision its pool (a race with provisioning, or a stale
/// cache on another replica), so the pool is enqueued for evaluation, but
/// only when the pool is static and managed. Claim updates and deletes are
/// handled by the pool path and the periodic requeue.
pub fn claim_created(
    claim: &NodeClaim,
    pools: &Store<NodePool>,
    classes: &dyn NodeClassCatalog,
) -> Option<ObjectRef<NodePool>> {
    let pool_name = claim.pool_name()?;
    let pool = pools.get(&ObjectRef::new(pool_name))?;
    (pool.is_static() && classes.is_managed(&pool)).then(|| ObjectRef::new(pool_name))
}
