use crate::metrics::{ControllerMetrics, Metrics};
use crate::nodeclass::NodeClassCatalog;
use crate::state::ClusterState;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::client::Client;
use kube::runtime::events::Reporter;
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub type ControllerId = &'static str;

/// Bounded-exponential retry profile applied to each node claim delete.
#[derive(Clone, Debug)]
pub struct DeleteBackoff {
    pub base: Duration,
    pub factor: u32,
    pub retries: u32,
}

impl Default for DeleteBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2,
            retries: 4,
        }
    }
}

impl DeleteBackoff {
    /// Delay before the given retry attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * self.factor.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Process-scope knobs for the scale-down controller. All in-memory,
/// provided by the surrounding binary; the core owns no flags or env vars.
#[derive(Clone, Debug)]
pub struct ScaleDownConfig {
    /// Upper bound on pools reconciled in parallel.
    pub max_concurrent_reconciles: u16,
    /// Heartbeat after a successful reconcile, the correctness backstop when
    /// watch events are missed.
    pub requeue_interval: Duration,
    pub delete_backoff: DeleteBackoff,
}

impl Default for ScaleDownConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 10,
            requeue_interval: Duration::from_secs(60),
            delete_backoff: DeleteBackoff::default(),
        }
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "nodepool-scaledown-controller".into(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    metrics: Arc<Metrics>,
    diagnostics: Arc<RwLock<Diagnostics>>,
}

impl State {
    pub fn new(registry: Registry, controllers: &[ControllerId]) -> Self {
        Self {
            metrics: Arc::new(Metrics::new(registry, controllers)),
            diagnostics: Arc::default(),
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.metrics.registry)?;
        Ok(buffer)
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        controller_id: ControllerId,
        cache: Arc<ClusterState>,
        classes: Arc<dyn NodeClassCatalog>,
        config: ScaleDownConfig,
        shutdown: CancellationToken,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.controller(controller_id),
            diagnostics: self.diagnostics.clone(),
            cache,
            classes,
            config,
            shutdown,
        })
    }
}

/// Context injected with each `reconcile` and `error_policy` invocation.
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Prometheus metrics for this controller
    pub metrics: Arc<ControllerMetrics>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Shared view of claims, nodes and pool counters
    pub cache: Arc<ClusterState>,
    /// Node classes this deployment owns
    pub classes: Arc<dyn NodeClassCatalog>,
    pub config: ScaleDownConfig,
    /// Fires when the process is shutting down; pending deletes abort
    pub shutdown: CancellationToken,
}
