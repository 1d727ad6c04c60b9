use crate::crd::nodepool::NodePool;
use crate::scaledown::cost;
use crate::state::{ClusterState, StateNode};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::client::Client;
use tracing::{debug, warn};

/// A scale-down candidate. Empty nodes (only DaemonSet pods, nothing marked
/// do-not-disrupt) always go first; the rest are ordered by disruption cost,
/// with nodes hosting a do-not-disrupt pod after everything else.
#[derive(Clone, Debug)]
pub enum Candidate {
    Empty(StateNode),
    NonEmpty {
        node: StateNode,
        cost: f64,
        undisruptable: bool,
    },
}

impl Candidate {
    fn into_node(self) -> StateNode {
        match self {
            Candidate::Empty(node) => node,
            Candidate::NonEmpty { node, .. } => node,
        }
    }

    fn node(&self) -> &StateNode {
        match self {
            Candidate::Empty(node) => node,
            Candidate::NonEmpty { node, .. } => node,
        }
    }

    fn rank(&self) -> (u8, u8, f64) {
        match self {
            Candidate::Empty(_) => (0, 0, 0.0),
            Candidate::NonEmpty {
                cost, undisruptable, ..
            } => (1, u8::from(*undisruptable), *cost),
        }
    }
}

/// Classify one node from the pods bound to it. A node whose claim has not
/// finished initializing cannot be proven empty: workloads may simply not
/// have landed yet, so it is costed like any other node instead of being
/// drained first.
pub(crate) fn classify(
    pool: &NodePool,
    node: StateNode,
    pods: &[Pod],
    is_known_daemon_set: &dyn Fn(&str, &str) -> bool,
    now: DateTime<Utc>,
) -> Candidate {
    let live: Vec<&Pod> = pods.iter().filter(|p| cost::is_evaluated(p)).collect();
    let undisruptable = live.iter().any(|p| cost::do_not_disrupt(p));
    if node.is_initialized()
        && !undisruptable
        && live
            .iter()
            .all(|p| cost::owned_by_known_daemon_set(p, is_known_daemon_set))
    {
        return Candidate::Empty(node);
    }

    let costs = cost::rescheduling_cost(pods, is_known_daemon_set);
    let factor = node
        .claim
        .as_ref()
        .map(|claim| cost::lifetime_remaining(pool, claim, now))
        .unwrap_or(1.0);
    Candidate::NonEmpty {
        node,
        cost: costs.cost * factor,
        undisruptable,
    }
}

/// Total order over candidates. The sort is stable, so equal ranks keep the
/// snapshot order the caller provided; no random tie-breaking.
pub(crate) fn order(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        let (a_tier, a_dnd, a_cost) = a.rank();
        let (b_tier, b_dnd, b_cost) = b.rank();
        a_tier
            .cmp(&b_tier)
            .then(a_dnd.cmp(&b_dnd))
            .then(a_cost.total_cmp(&b_cost))
    });
    candidates
}

/// Pick at most `want` nodes whose deletion brings the pool back to its
/// declared replicas, cheapest disruption first.
///
/// Nodes already marked for deletion, nodes without a bound claim, and
/// claims whose node has not registered yet are never candidates. A node
/// whose pods cannot be listed is skipped with a warning: it can be neither
/// proven empty nor costed, and one namespace's RBAC problem must not stall
/// the pool.
pub async fn select(
    client: &Client,
    cache: &ClusterState,
    pool: &NodePool,
    nodes: Vec<StateNode>,
    want: usize,
    now: DateTime<Utc>,
) -> Vec<StateNode> {
    let is_known_daemon_set = |namespace: &str, name: &str| cache.has_daemon_set(namespace, name);

    let mut candidates = Vec::new();
    for node in nodes
        .into_iter()
        .filter(|n| n.is_active() && n.node.is_some())
    {
        let pods = match node.pods(client.clone()).await {
            Ok(pods) => pods,
            Err(error) => {
                warn!(
                    node = node.node_name().unwrap_or_default(),
                    %error,
                    "failed to list pods, node will not be considered for scale-down"
                );
                continue;
            }
        };
        candidates.push(classify(pool, node, &pods, &is_known_daemon_set, now));
    }

    let chosen: Vec<StateNode> = order(candidates)
        .into_iter()
        .take(want)
        .inspect(|candidate| {
            debug!(
                claim = candidate.node().claim_name().unwrap_or_default(),
                empty = matches!(candidate, Candidate::Empty(_)),
                "selected scale-down candidate"
            );
        })
        .map(Candidate::into_node)
        .collect();
    chosen
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::nodeclaim::{NodeClaim, NodeClaimSpec};
    use crate::crd::nodepool::NodePoolSpec;
    use crate::{DO_NOT_DISRUPT_ANNOTATION, NODE_INITIALIZED_LABEL};

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::{Resource, ResourceExt};

    fn initialized_claim(name: &str) -> NodeClaim {
        let mut claim = NodeClaim::new(name, NodeClaimSpec::default());
        claim
            .labels_mut()
            .insert(NODE_INITIALIZED_LABEL.to_string(), "true".to_string());
        claim
    }

    fn state_node(claim_name: &str) -> StateNode {
        StateNode {
            claim: Some(Arc::new(initialized_claim(claim_name))),
            node: None,
            marked_for_deletion: false,
            nominated_until: None,
        }
    }

    fn regular_pod(priority: i32) -> Pod {
        let mut pod = Pod {
            spec: Some(PodSpec {
                priority: Some(priority),
                ..PodSpec::default()
            }),
            ..Pod::default()
        };
        pod.meta_mut().namespace = Some("default".to_string());
        pod
    }

    fn ds_pod() -> Pod {
        let mut pod = regular_pod(0);
        pod.meta_mut().namespace = Some("kube-system".to_string());
        pod.meta_mut().owner_references = Some(vec![OwnerReference {
            kind: "DaemonSet".to_string(),
            name: "proxy".to_string(),
            api_version: "apps/v1".to_string(),
            ..OwnerReference::default()
        }]);
        pod
    }

    fn dnd_pod() -> Pod {
        let mut pod = regular_pod(0);
        pod.meta_mut().annotations = Some(BTreeMap::from([(
            DO_NOT_DISRUPT_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        pod
    }

    fn all_known(_: &str, _: &str) -> bool {
        true
    }

    fn pool() -> NodePool {
        NodePool::new("workers", NodePoolSpec::default())
    }

    /// Eight claims with the pod mix from the disruption-ordering scenario:
    /// two empty (DaemonSet-only), two low-priority, two high-priority, two
    /// carrying do-not-disrupt pods.
    fn scenario_candidates() -> Vec<Candidate> {
        let now = Utc::now();
        let p = pool();
        let mut candidates = Vec::new();
        for (claim, pods) in [
            ("c-dnd-0", vec![dnd_pod()]),
            ("c-high-0", vec![regular_pod(10_000)]),
            ("c-low-0", vec![regular_pod(0)]),
            ("c-ds-0", vec![ds_pod()]),
            ("c-dnd-1", vec![dnd_pod(), regular_pod(0)]),
            ("c-high-1", vec![regular_pod(10_000)]),
            ("c-low-1", vec![regular_pod(0)]),
            ("c-ds-1", vec![ds_pod(), ds_pod()]),
        ] {
            candidates.push(classify(&p, state_node(claim), &pods, &all_known, now));
        }
        candidates
    }

    fn claim_names(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| c.node().claim_name().unwrap())
            .collect()
    }

    #[test]
    fn empty_nodes_come_first_then_cost_then_do_not_disrupt() {
        let ordered = order(scenario_candidates());
        assert_eq!(
            claim_names(&ordered),
            [
                "c-ds-0", "c-ds-1", // empty tier, snapshot order preserved
                "c-low-0", "c-low-1", // cheapest non-empty
                "c-high-0", "c-high-1", // priority raises the cost
                "c-dnd-0", "c-dnd-1" // undisruptable always last
            ]
        );
    }

    #[test]
    fn every_scale_target_takes_a_prefix_of_the_same_order() {
        // scaling 8 -> 6 -> 4 -> 2 -> 0 peels candidates off the same prefix
        let ordered = claim_names(&order(scenario_candidates()));
        assert_eq!(ordered[..2], ["c-ds-0", "c-ds-1"]);
        assert_eq!(ordered[2..4], ["c-low-0", "c-low-1"]);
        assert_eq!(ordered[4..6], ["c-high-0", "c-high-1"]);
        assert_eq!(ordered[6..], ["c-dnd-0", "c-dnd-1"]);
    }

    #[test]
    fn ordering_is_deterministic() {
        let first = claim_names(&order(scenario_candidates()));
        let second = claim_names(&order(scenario_candidates()));
        assert_eq!(first, second);
    }

    #[test]
    fn no_empty_node_follows_a_non_empty_one() {
        let ordered = order(scenario_candidates());
        for pair in ordered.windows(2) {
            let non_empty_then_empty = matches!(pair[0], Candidate::NonEmpty { .. })
                && matches!(pair[1], Candidate::Empty(_));
            assert!(!non_empty_then_empty);
        }
    }

    #[test]
    fn daemon_set_pod_with_do_not_disrupt_blocks_emptiness() {
        let mut pod = ds_pod();
        pod.meta_mut().annotations = Some(BTreeMap::from([(
            DO_NOT_DISRUPT_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        let candidate = classify(&pool(), state_node("c0"), &[pod], &all_known, Utc::now());
        assert!(matches!(
            candidate,
            Candidate::NonEmpty {
                undisruptable: true,
                ..
            }
        ));
    }

    #[test]
    fn podless_node_is_empty() {
        let candidate = classify(&pool(), state_node("c0"), &[], &all_known, Utc::now());
        assert!(matches!(candidate, Candidate::Empty(_)));
    }

    #[test]
    fn uninitialized_node_is_never_empty() {
        let uninitialized = StateNode {
            claim: Some(Arc::new(NodeClaim::new("c0", NodeClaimSpec::default()))),
            ..StateNode::default()
        };
        let candidate = classify(&pool(), uninitialized, &[], &all_known, Utc::now());
        assert!(matches!(
            candidate,
            Candidate::NonEmpty {
                undisruptable: false,
                ..
            }
        ));

        // it still sorts ahead of nodes with workloads, just behind empty ones
        let ordered = order(vec![
            classify(
                &pool(),
                StateNode {
                    claim: Some(Arc::new(NodeClaim::new("c-new", NodeClaimSpec::default()))),
                    ..StateNode::default()
                },
                &[],
                &all_known,
                Utc::now(),
            ),
            classify(
                &pool(),
                state_node("c-busy"),
                &[regular_pod(0)],
                &all_known,
                Utc::now(),
            ),
            classify(&pool(), state_node("c-empty"), &[], &all_known, Utc::now()),
        ]);
        assert_eq!(claim_names(&ordered), ["c-empty", "c-new", "c-busy"]);
    }

    #[test]
    fn older_claims_sort_before_fresh_ones_at_equal_pods() {
        let now = Utc::now();
        let mut p = pool();
        p.spec.expected_lifetime = Some("100s".to_string());

        let mut old_claim = NodeClaim::new("c-old", NodeClaimSpec::default());
        old_claim.meta_mut().creation_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now - chrono::Duration::seconds(90)),
        );
        let mut fresh_claim = NodeClaim::new("c-new", NodeClaimSpec::default());
        fresh_claim.meta_mut().creation_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now - chrono::Duration::seconds(5)),
        );

        let old = StateNode {
            claim: Some(Arc::new(old_claim)),
            ..StateNode::default()
        };
        let fresh = StateNode {
            claim: Some(Arc::new(fresh_claim)),
            ..StateNode::default()
        };

        let pods = vec![regular_pod(0)];
        let ordered = order(vec![
            classify(&p, fresh, &pods, &all_known, now),
            classify(&p, old, &pods, &all_known, now),
        ]);
        assert_eq!(claim_names(&ordered), ["c-old", "c-new"]);
    }
}
