use crate::controller::ControllerId;
use crate::error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use kube::ResourceExt;
use opentelemetry::trace::TraceId;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::{
    counter::Counter, exemplar::HistogramWithExemplars, family::Family, gauge::Gauge,
};
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

/// Watch event kind that triggered bookkeeping.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Action {
    Apply,
    Delete,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TriggerLabels {
    pub action: Action,
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeletionLabels {
    pub pool: String,
    pub capacity_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub instance: String,
    pub error: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}

impl TryFrom<&TraceId> for TraceLabel {
    type Error = Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::InvalidTraceId)
        } else {
            let trace_id = id.to_string();
            Ok(Self { id: trace_id })
        }
    }
}

pub struct Metrics {
    pub registry: Arc<Registry>,
    controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(mut registry: Registry, ids: &[ControllerId]) -> Self {
        let controllers = ids
            .iter()
            .map(|id| {
                let sub = registry.sub_registry_with_prefix(id);
                (*id, Arc::new(ControllerMetrics::default().register(sub)))
            })
            .collect();
        Self {
            registry: Arc::new(registry),
            controllers,
        }
    }

    pub fn controller(&self, id: ControllerId) -> Arc<ControllerMetrics> {
        self.controllers
            .get(id)
            .cloned()
            .expect("controller metrics registered at startup")
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    ready: Gauge,
    triggered: Family<TriggerLabels, Counter>,
    watch_failures: Counter,
    deletions: Family<DeletionLabels, Counter>,
    pub reconcile: ReconcileMetrics,
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self {
            ready: Gauge::default(),
            triggered: Family::<TriggerLabels, Counter>::default(),
            watch_failures: Counter::default(),
            deletions: Family::<DeletionLabels, Counter>::default(),
            reconcile: ReconcileMetrics::default(),
        }
    }
}

impl ControllerMetrics {
    /// Register controller metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "ready",
            "controller is watching and serving reconciles",
            self.ready.clone(),
        );
        r.register(
            "triggered",
            "watch events observed by action and kind",
            self.triggered.clone(),
        );
        r.register(
            "watch_operations_failed",
            "watch stream errors",
            self.watch_failures.clone(),
        );
        r.register(
            "node_claim_deletions",
            "node claims deleted to enforce pool replicas, by pool and capacity type",
            self.deletions.clone(),
        );
        let reconcile = self
            .reconcile
            .clone()
            .register(r.sub_registry_with_prefix("reconcile"));
        Self { reconcile, ..self }
    }

    pub fn ready_set(&self, value: i64) {
        self.ready.set(value);
    }

    pub fn triggered_inc(&self, action: Action, kind: &str) {
        self.triggered
            .get_or_create(&TriggerLabels {
                action,
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch_failures.inc();
    }

    pub fn deletions_inc(&self, pool: &str, capacity_type: &str) {
        self.deletions
            .get_or_create(&DeletionLabels {
                pool: pool.to_string(),
                capacity_type: capacity_type.to_string(),
            })
            .inc();
    }

    pub fn reconcile_failure_set<K: ResourceExt>(&self, obj: &Arc<K>, error: &Error) {
        self.reconcile.set_failure(obj, error);
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<(), Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::<(), Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10.].into_iter()),
        }
    }
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        self
    }

    pub fn set_failure<K: ResourceExt>(&self, obj: &Arc<K>, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                instance: obj.name_any(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, trace_id: &TraceId) -> ReconcileMeasurer {
        self.runs.get_or_create(&()).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}
