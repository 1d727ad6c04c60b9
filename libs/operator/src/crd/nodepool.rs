use super::NodeClassRef;

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A pool of nodes provisioned from a single node class.
///
/// A pool is *static* when `replicas` declares an exact node-claim count;
/// the scale-down controller deletes excess claims until the pool matches.
/// Pools without `replicas` autoscale through other controllers and are
/// ignored here. This controller never writes to the pool object.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "scaling.example.com",
    version = "v1",
    kind = "NodePool",
    plural = "nodepools",
    shortname = "np",
    status = "NodePoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Desired number of node claims. Present iff the pool is static.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,

    /// Expected node lifetime as a humantime duration (e.g. `"720h"`).
    /// Claims close to the end of their expected lifetime are cheaper to
    /// disrupt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lifetime: Option<String>,

    /// Template stamped onto node claims spawned into this pool.
    #[serde(default)]
    pub template: NodeClaimTemplate,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,

    #[serde(default)]
    pub spec: NodeClaimTemplateSpec,
}

/// Metadata inherited by spawned node claims.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimTemplateSpec {
    /// The node class new claims are provisioned from; also decides whether
    /// this deployment manages the pool at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class_ref: Option<NodeClassRef>,
}

/// Written by the provisioning controller, read-only here.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// Aggregate capacity across the pool's registered nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, Quantity>>,
}

impl NodePool {
    pub fn node_class_ref(&self) -> Option<&NodeClassRef> {
        self.spec.template.spec.node_class_ref.as_ref()
    }

    /// Static pools declare an exact replica count.
    pub fn is_static(&self) -> bool {
        self.spec.replicas.is_some()
    }

    /// Declared expected node lifetime. An unparseable value behaves like an
    /// absent one.
    pub fn expected_lifetime(&self) -> Option<Duration> {
        self.spec
            .expected_lifetime
            .as_deref()
            .and_then(|v| humantime::parse_duration(v).ok())
    }
}
