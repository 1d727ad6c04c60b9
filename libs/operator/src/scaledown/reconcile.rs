use crate::controller::Context;
use crate::crd::nodepool::NodePool;
use crate::error::Error;
use crate::scaledown::{executor, selector};
use crate::state::StateNode;
use crate::telemetry;

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, field, info, instrument, warn, Span};

/// Enforce a static pool's declared replica count by deleting excess node
/// claims. Runs once per enqueued pool key; the framework serializes
/// reconciles per pool.
#[instrument(skip(ctx, pool), fields(trace_id))]
pub async fn reconcile_pool(pool: Arc<NodePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = pool.name_any();

    // Pools whose node class resolves to nothing we registered belong to a
    // different deployment.
    if !ctx.classes.is_managed(&pool) {
        debug!(pool = %name, "pool node class is not registered, skipping");
        return Ok(Action::await_change());
    }
    // Pools without a declared count autoscale through other controllers.
    let Some(replicas) = pool.spec.replicas else {
        debug!(pool = %name, "pool declares no replicas, skipping");
        return Ok(Action::await_change());
    };

    // Claims already marked by us or by the disruption controller, and
    // claims with a deletion timestamp, no longer count as running; during a
    // disruption storm the pool waits for the counters to settle rather than
    // scaling down further.
    let active: Vec<StateNode> = ctx
        .cache
        .pool_nodes(&name)
        .into_iter()
        .filter(StateNode::is_active)
        .collect();
    let excess = active.len() as i64 - replicas;
    if excess <= 0 {
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }

    info!(pool = %name, running = active.len(), replicas, excess, "pool is over-provisioned");

    let candidates = selector::select(
        &ctx.client,
        &ctx.cache,
        &pool,
        active,
        excess as usize,
        Utc::now(),
    )
    .await;
    if candidates.is_empty() {
        warn!(pool = %name, "no deletable candidate for over-provisioned pool");
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }

    executor::delete_candidates(&ctx, &name, candidates).await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}
