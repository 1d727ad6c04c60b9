use crate::crd::nodeclaim::NodeClaim;
use crate::crd::nodepool::NodePool;
use crate::DO_NOT_DISRUPT_ANNOTATION;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};

/// Flat overhead charged for rescheduling any regular pod.
pub(crate) const POD_RESCHEDULE_OVERHEAD: f64 = 1.0;

/// Weight applied to the pod's priority class value on top of the overhead.
/// The absolute scale is arbitrary; only the ordering it induces matters.
pub(crate) const POD_PRIORITY_WEIGHT: f64 = 1e-3;

/// Sentinel contribution of a do-not-disrupt pod, above any finite sum a
/// realistic node can accumulate.
pub(crate) const UNDISRUPTABLE_COST: f64 = 1e9;

/// Rescheduling cost of disrupting a set of pods, plus whether any of them
/// forbids disruption outright.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PodCosts {
    pub cost: f64,
    pub undisruptable: bool,
}

/// Whether the operator marked this pod as off-limits for voluntary
/// disruption.
pub fn do_not_disrupt(pod: &Pod) -> bool {
    pod.annotations()
        .get(DO_NOT_DISRUPT_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Pods that factor into disruption decisions. Terminal pods are gone either
/// way; gated pods have not been scheduled and will be placed elsewhere by
/// the scheduler.
pub(crate) fn is_evaluated(pod: &Pod) -> bool {
    let terminal = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    let gated = pod
        .spec
        .as_ref()
        .and_then(|s| s.scheduling_gates.as_ref())
        .is_some_and(|gates| !gates.is_empty());
    !terminal && !gated
}

/// Name of the DaemonSet owning this pod, if any.
pub(crate) fn daemon_set_owner(pod: &Pod) -> Option<&str> {
    pod.owner_references()
        .iter()
        .find(|r| r.kind == "DaemonSet")
        .map(|r| r.name.as_str())
}

/// Whether the pod is owned by a DaemonSet the cluster still runs. DaemonSet
/// pods are recreated wherever the replacement node lands, so they cost
/// nothing to disrupt.
pub(crate) fn owned_by_known_daemon_set(
    pod: &Pod,
    is_known: &dyn Fn(&str, &str) -> bool,
) -> bool {
    match daemon_set_owner(pod) {
        Some(owner) => is_known(&pod.namespace().unwrap_or_default(), owner),
        None => false,
    }
}

/// Sum of per-pod contributions: do-not-disrupt pods push the sentinel,
/// DaemonSet pods are free, everything else pays the reschedule overhead
/// weighted by its priority class.
pub fn rescheduling_cost(pods: &[Pod], is_known_daemon_set: &dyn Fn(&str, &str) -> bool) -> PodCosts {
    let mut costs = PodCosts::default();
    for pod in pods.iter().filter(|p| is_evaluated(p)) {
        if do_not_disrupt(pod) {
            costs.cost += UNDISRUPTABLE_COST;
            costs.undisruptable = true;
            continue;
        }
        if owned_by_known_daemon_set(pod, is_known_daemon_set) {
            continue;
        }
        let priority = pod
            .spec
            .as_ref()
            .and_then(|s| s.priority)
            .unwrap_or(0)
            .max(0) as f64;
        costs.cost += POD_RESCHEDULE_OVERHEAD + priority * POD_PRIORITY_WEIGHT;
    }
    costs
}

/// Discount in `[0, 1]` making claims near the end of their expected
/// lifetime cheaper to disrupt: `max(0, 1 − age/expectedLifetime)`. Pools
/// without an expected lifetime do not discount.
pub fn lifetime_remaining(pool: &NodePool, claim: &NodeClaim, now: DateTime<Utc>) -> f64 {
    let Some(expected) = pool.expected_lifetime() else {
        return 1.0;
    };
    if expected.is_zero() {
        return 0.0;
    }
    let Some(created) = claim.meta().creation_timestamp.as_ref() else {
        return 1.0;
    };
    let age = (now - created.0)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    (1.0 - age.as_secs_f64() / expected.as_secs_f64()).clamp(0.0, 1.0)
}
