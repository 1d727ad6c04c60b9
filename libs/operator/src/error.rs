use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors possible to occur during reconciliation
#[derive(Error, Debug)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    /// A single node claim delete that failed after retries.
    #[error("delete of node claim {claim} failed: {source}")]
    ClaimDelete {
        claim: String,
        #[source]
        source: kube::Error,
    },

    /// Combined outcome of a delete fan-out where at least one worker failed.
    #[error("{failed} of {total} node claim deletions failed")]
    DeleteAggregate {
        total: usize,
        failed: usize,
        errors: Vec<Error>,
    },

    /// The reconcile was cancelled before the delete batch completed.
    #[error("reconcile cancelled")]
    Cancelled,

    #[error("invalid trace ID")]
    InvalidTraceId,
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError { .. } => "kube_error",
            Error::ClaimDelete { .. } => "claim_delete",
            Error::DeleteAggregate { .. } => "delete_aggregate",
            Error::Cancelled => "cancelled",
            Error::InvalidTraceId => "invalid_trace_id",
        }
        .to_string()
    }
}

/// `DELETE` of an object that is already gone counts as success.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Conflicts are retried with backoff before giving up.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// API-side congestion that a short backoff is likely to clear.
pub fn is_transient(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if matches!(ae.code, 429 | 500 | 503 | 504))
}

#[cfg(test)]
mod test {
    use super::*;

    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(is_conflict(&api_error(409, "Conflict")));
        assert!(is_transient(&api_error(429, "TooManyRequests")));
        assert!(is_transient(&api_error(503, "ServiceUnavailable")));
        assert!(!is_transient(&api_error(403, "Forbidden")));
        assert!(!is_not_found(&api_error(409, "Conflict")));
    }

    #[test]
    fn aggregate_display_counts_failures() {
        let err = Error::DeleteAggregate {
            total: 3,
            failed: 2,
            errors: vec![],
        };
        assert_eq!(err.to_string(), "2 of 3 node claim deletions failed");
    }
}
