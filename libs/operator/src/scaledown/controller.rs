use crate::controller::{Context, ControllerId, ScaleDownConfig, State};
use crate::crd::nodeclaim::NodeClaim;
use crate::crd::nodepool::NodePool;
use crate::error::Error;
use crate::metrics;
use crate::nodeclass::NodeClassCatalog;
use crate::scaledown::reconcile::reconcile_pool;
use crate::state::ClusterState;
use crate::trigger;

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const CONTROLLER_ID: ControllerId = "scaledown";

const TRIGGER_BUFFER_SIZE: usize = 256;
const DEBOUNCE: Duration = Duration::from_millis(500);

fn error_policy(pool: Arc<NodePool>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(msg = "failed reconciliation", pool = %pool.name_any(), %error);
    ctx.metrics.reconcile_failure_set(&pool, error);
    Action::requeue(Duration::from_secs(5 * 60))
}

/// Initialize the scale-down controller and its cache feeds (given the CRDs
/// are installed).
///
/// The controller itself only watches pools, filtered down to replica-count
/// changes; claim, node and daemonset watches feed the shared cluster state,
/// with claim creations fanned out to their owning pool key.
pub async fn run(
    state: State,
    client: Client,
    classes: Arc<dyn NodeClassCatalog>,
    config: ScaleDownConfig,
) {
    let nodepools = Api::<NodePool>::all(client.clone());
    if let Err(e) = nodepools.list(&ListParams::default().limit(1)).await {
        error!("NodePool CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let cache = Arc::new(ClusterState::default());
    let shutdown = CancellationToken::new();
    {
        // the controller stream shuts down on the same signals; the token
        // additionally aborts delete batches in flight. SIGTERM is how
        // Kubernetes terminates the pod, ctrl-c covers local runs.
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    error!(msg = "failed to install SIGTERM handler", %e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            shutdown.cancel();
        });
    }

    let ctx = state.to_context(
        client.clone(),
        CONTROLLER_ID,
        cache,
        classes,
        config.clone(),
        shutdown,
    );

    let (pool_store, pool_writer) = reflector::store::<NodePool>();
    let pool_stream = watcher(nodepools, watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(pool_writer)
        .applied_objects()
        .predicate_filter(trigger::replicas_revision);

    let (trigger_tx, trigger_rx) = mpsc::channel::<ObjectRef<NodePool>>(TRIGGER_BUFFER_SIZE);

    let claims_feed = claim_watch(client.clone(), ctx.clone(), pool_store.clone(), trigger_tx);
    let nodes_feed = node_watch(client.clone(), ctx.clone());
    let daemon_sets_feed = daemon_set_watch(client.clone(), ctx.clone());

    info!(msg = "starting static pool scale-down controller");
    let scaledown_controller = Controller::for_stream(pool_stream, pool_store)
        .with_config(
            controller::Config::default()
                .concurrency(config.max_concurrent_reconciles)
                .debounce(DEBOUNCE),
        )
        .reconcile_on(trigger_rx)
        .shutdown_on_signal()
        .run(reconcile_pool, error_policy, ctx.clone())
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::select! {
        _ = scaledown_controller => {},
        _ = claims_feed => {},
        _ = nodes_feed => {},
        _ = daemon_sets_feed => {},
    }
    ctx.metrics.ready_set(0);
}

/// Feed claim events into the cache; fan creations out to the owning pool.
async fn claim_watch(
    client: Client,
    ctx: Arc<Context>,
    pools: Store<NodePool>,
    mut trigger_tx: mpsc::Sender<ObjectRef<NodePool>>,
) {
    let claims = Api::<NodeClaim>::all(client);
    let mut stream = pin!(watcher(claims, watcher::Config::default()).default_backoff());
    let mut relist: Option<HashSet<String>> = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(claim)) => {
                let created = ctx.cache.apply_claim(&claim);
                ctx.metrics.triggered_inc(metrics::Action::Apply, "NodeClaim");
                if created {
                    // a fresh claim may already over-provision its pool
                    if let Some(pool) =
                        trigger::claim_created(&claim, &pools, ctx.classes.as_ref())
                    {
                        debug!(claim = %claim.name_any(), pool = %pool.name, "new claim enqueues its pool");
                        let _ignore_full = trigger_tx
                            .try_send(pool)
                            .map_err(|e| error!(msg = "failed to enqueue pool for evaluation", %e));
                    }
                }
            }
            Ok(watcher::Event::Delete(claim)) => {
                ctx.cache.delete_claim(&claim.name_any());
                ctx.metrics.triggered_inc(metrics::Action::Delete, "NodeClaim");
            }
            Ok(watcher::Event::Init) => relist = Some(HashSet::new()),
            Ok(watcher::Event::InitApply(claim)) => {
                ctx.cache.apply_claim(&claim);
                if let Some(seen) = relist.as_mut() {
                    seen.insert(claim.name_any());
                }
            }
            Ok(watcher::Event::InitDone) => {
                if let Some(seen) = relist.take() {
                    ctx.cache.retain_claims(&seen);
                }
            }
            Err(e) => {
                error!(msg = "unexpected error when watching node claims", %e);
                ctx.metrics.watch_operations_failed_inc();
            }
        }
    }
}

/// Join nodes onto their claims as they register.
async fn node_watch(client: Client, ctx: Arc<Context>) {
    let nodes = Api::<Node>::all(client);
    let mut stream = pin!(watcher(nodes, watcher::Config::default()).default_backoff());
    let mut relist: Option<HashSet<String>> = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(node)) => {
                ctx.cache.apply_node(&node);
                ctx.metrics.triggered_inc(metrics::Action::Apply, "Node");
            }
            Ok(watcher::Event::Delete(node)) => {
                ctx.cache.delete_node(&node.name_any());
                ctx.metrics.triggered_inc(metrics::Action::Delete, "Node");
            }
            Ok(watcher::Event::Init) => relist = Some(HashSet::new()),
            Ok(watcher::Event::InitApply(node)) => {
                ctx.cache.apply_node(&node);
                if let Some(seen) = relist.as_mut() {
                    seen.insert(node.name_any());
                }
            }
            Ok(watcher::Event::InitDone) => {
                if let Some(seen) = relist.take() {
                    ctx.cache.retain_nodes(&seen);
                }
            }
            Err(e) => {
                error!(msg = "unexpected error when watching nodes", %e);
                ctx.metrics.watch_operations_failed_inc();
            }
        }
    }
}

/// Track the set of live DaemonSets; the cost model only trusts DaemonSet
/// owner references that resolve to one of these.
async fn daemon_set_watch(client: Client, ctx: Arc<Context>) {
    let daemon_sets = Api::<DaemonSet>::all(client);
    let mut stream = pin!(watcher(daemon_sets, watcher::Config::default()).default_backoff());
    let mut relist: Option<HashSet<String>> = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(ds)) => {
                ctx.cache.apply_daemon_set(&ds);
                ctx.metrics.triggered_inc(metrics::Action::Apply, "DaemonSet");
            }
            Ok(watcher::Event::Delete(ds)) => {
                ctx.cache.delete_daemon_set(&ds);
                ctx.metrics.triggered_inc(metrics::Action::Delete, "DaemonSet");
            }
            Ok(watcher::Event::Init) => relist = Some(HashSet::new()),
            Ok(watcher::Event::InitApply(ds)) => {
                ctx.cache.apply_daemon_set(&ds);
                if let Some(seen) = relist.as_mut() {
                    seen.insert(format!(
                        "{}/{}",
                        ds.namespace().unwrap_or_default(),
                        ds.name_any()
                    ));
                }
            }
            Ok(watcher::Event::InitDone) => {
                if let Some(seen) = relist.take() {
                    ctx.cache.retain_daemon_sets(&seen);
                }
            }
            Err(e) => {
                error!(msg = "unexpected error when watching daemonsets", %e);
                ctx.metrics.watch_operations_failed_inc();
            }
        }
    }
}
