#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions};
    use kube::ResourceExt;
    use nodepool_operator::crd::nodeclaim::{NodeClaim, NodeClaimSpec};
    use nodepool_operator::crd::nodepool::{NodePool, NodePoolSpec};
    use nodepool_operator::crd::NodeClassRef;
    use nodepool_operator::POOL_NAME_LABEL;
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    fn pool(name: &str, replicas: i64) -> NodePool {
        let mut pool = NodePool::new(
            name,
            NodePoolSpec {
                replicas: Some(replicas),
                ..NodePoolSpec::default()
            },
        );
        pool.spec.template.spec.node_class_ref = Some(NodeClassRef {
            group: "scaling.example.com".to_string(),
            kind: "StaticNodeClass".to_string(),
            name: "default".to_string(),
        });
        pool
    }

    fn claim(name: &str, pool: &str) -> NodeClaim {
        let mut claim = NodeClaim::new(name, NodeClaimSpec::default());
        claim
            .labels_mut()
            .insert(POOL_NAME_LABEL.to_string(), pool.to_string());
        claim
    }

    async fn active_claims(api: &Api<NodeClaim>, pool: &str) -> Vec<NodeClaim> {
        let lp = ListParams::default().labels(&format!("{POOL_NAME_LABEL}={pool}"));
        api.list(&lp)
            .await
            .unwrap()
            .items
            .into_iter()
            .filter(|c| c.meta().deletion_timestamp.is_none())
            .collect()
    }

    async fn wait_for_active_count(api: &Api<NodeClaim>, pool: &str, want: usize) {
        timeout(Duration::from_secs(60), async {
            loop {
                if active_claims(api, pool).await.len() == want {
                    return;
                }
                sleep(Duration::from_secs(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("pool {pool} never settled at {want} active claims"));
    }

    async fn setup(name: &str, replicas: i64, claims: usize) -> (Api<NodePool>, Api<NodeClaim>) {
        let client = Client::try_default().await.unwrap();
        let pool_api = Api::<NodePool>::all(client.clone());
        let claim_api = Api::<NodeClaim>::all(client);

        pool_api
            .create(&PostParams::default(), &pool(name, replicas))
            .await
            .unwrap();
        for i in 0..claims {
            claim_api
                .create(&PostParams::default(), &claim(&format!("{name}-{i}"), name))
                .await
                .unwrap();
        }
        (pool_api, claim_api)
    }

    async fn teardown(pool_api: &Api<NodePool>, claim_api: &Api<NodeClaim>, name: &str) {
        for claim in active_claims(claim_api, name).await {
            let _ = claim_api.delete(&claim.name_any(), &Default::default()).await;
        }
        if let Ok(pool) = pool_api.get(name).await {
            pool_api.delete(name, &Default::default()).await.unwrap();
            await_condition(
                pool_api.clone(),
                name,
                conditions::is_deleted(&pool.uid().unwrap()),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn excess_claims_are_deleted() {
        let name = "e2e-excess";
        let (pool_api, claim_api) = setup(name, 1, 2).await;

        wait_for_active_count(&claim_api, name, 1).await;

        teardown(&pool_api, &claim_api, name).await;
    }

    #[tokio::test]
    async fn zero_replica_pool_drains() {
        let name = "e2e-drain";
        let (pool_api, claim_api) = setup(name, 0, 2).await;

        wait_for_active_count(&claim_api, name, 0).await;

        teardown(&pool_api, &claim_api, name).await;
    }

    #[tokio::test]
    async fn lowering_replicas_scales_the_pool_down() {
        let name = "e2e-rescale";
        let (pool_api, claim_api) = setup(name, 3, 3).await;
        wait_for_active_count(&claim_api, name, 3).await;

        let patch = json!({ "spec": { "replicas": 1 } });
        pool_api
            .patch(name, &PatchParams::apply("e2e-tests"), &Patch::Merge(&patch))
            .await
            .unwrap();

        wait_for_active_count(&claim_api, name, 1).await;

        teardown(&pool_api, &claim_api, name).await;
    }

    #[tokio::test]
    async fn autoscaling_pool_is_left_alone() {
        let name = "e2e-autoscale";
        let client = Client::try_default().await.unwrap();
        let pool_api = Api::<NodePool>::all(client.clone());
        let claim_api = Api::<NodeClaim>::all(client);

        let mut autoscaling = pool(name, 0);
        autoscaling.spec.replicas = None;
        pool_api
            .create(&PostParams::default(), &autoscaling)
            .await
            .unwrap();
        claim_api
            .create(&PostParams::default(), &claim(&format!("{name}-0"), name))
            .await
            .unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(active_claims(&claim_api, name).await.len(), 1);

        teardown(&pool_api, &claim_api, name).await;
    }
}
