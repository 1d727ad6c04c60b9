use crate::controller::Context;
use crate::crd::nodeclaim::NodeClaim;
use crate::error::{is_conflict, is_not_found, is_transient, Error};
use crate::state::StateNode;

use futures::stream::{self, StreamExt};
use kube::api::{Api, DeleteParams};
use tracing::{error, info};

/// Delete the selected claims concurrently and mark them in the cache.
///
/// Not-found means a peer got there first and counts as success. Conflicts
/// and transient API failures retry with the configured backoff. Successful
/// deletions stand even when siblings fail; the remaining excess is retried
/// by the error-policy backoff.
pub async fn delete_candidates(
    ctx: &Context,
    pool: &str,
    candidates: Vec<StateNode>,
) -> Result<(), Error> {
    let total = candidates.len();
    let api: Api<NodeClaim> = Api::all(ctx.client.clone());

    let results: Vec<Result<(), Error>> = stream::iter(candidates)
        .map(|candidate| {
            let api = api.clone();
            async move { delete_one(ctx, &api, pool, candidate).await }
        })
        .buffer_unordered(total.max(1))
        .collect()
        .await;

    let errors: Vec<Error> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        return Ok(());
    }
    if errors.iter().any(|e| matches!(e, Error::Cancelled)) {
        return Err(Error::Cancelled);
    }
    Err(Error::DeleteAggregate {
        total,
        failed: errors.len(),
        errors,
    })
}

async fn delete_one(
    ctx: &Context,
    api: &Api<NodeClaim>,
    pool: &str,
    candidate: StateNode,
) -> Result<(), Error> {
    if ctx.shutdown.is_cancelled() {
        return Err(Error::Cancelled);
    }
    // the selector only yields claimed nodes
    let Some(name) = candidate.claim_name() else {
        return Ok(());
    };

    let backoff = &ctx.config.delete_backoff;
    let mut attempt = 0;
    loop {
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => break,
            Err(e) if is_not_found(&e) => break,
            Err(e) if (is_conflict(&e) || is_transient(&e)) && attempt < backoff.retries => {
                attempt += 1;
                tokio::time::sleep(backoff.delay(attempt)).await;
                if ctx.shutdown.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
            Err(e) => {
                error!(claim = %name, pool = %pool, error = %e, "node claim delete failed");
                return Err(Error::ClaimDelete {
                    claim: name,
                    source: e,
                });
            }
        }
    }

    if let Some(provider_id) = candidate.provider_id() {
        ctx.cache.mark_for_deletion(provider_id);
    }
    let capacity_type = candidate
        .capacity_type()
        .unwrap_or_else(|| "unknown".to_string());
    ctx.metrics.deletions_inc(pool, &capacity_type);
    info!(claim = %name, pool = %pool, capacity_type = %capacity_type, "deleted node claim");
    Ok(())
}
