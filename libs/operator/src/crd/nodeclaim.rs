use super::NodeClassRef;
use crate::{NODE_INITIALIZED_LABEL, POOL_NAME_LABEL};

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A declarative request for a single compute node.
///
/// Created by the provisioning controller; a finalizer on the claim performs
/// the cloud deprovisioning and pod drain once the claim is deleted. The
/// scale-down controller only ever observes and deletes claims.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "scaling.example.com",
    version = "v1",
    kind = "NodeClaim",
    plural = "nodeclaims",
    shortname = "nc",
    status = "NodeClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class_ref: Option<NodeClassRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimStatus {
    /// Stable identifier of the backing instance, assigned exactly once when
    /// the cloud provider fulfils the claim, never reassigned.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "providerID")]
    pub provider_id: Option<String>,

    /// Capacity reported for the backing instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<BTreeMap<String, Quantity>>,
}

impl NodeClaim {
    pub fn provider_id(&self) -> Option<&str> {
        self.status.as_ref()?.provider_id.as_deref()
    }

    /// Owning pool, from the pool-name label.
    pub fn pool_name(&self) -> Option<&str> {
        self.labels().get(POOL_NAME_LABEL).map(String::as_str)
    }

    pub fn is_initialized(&self) -> bool {
        self.labels()
            .get(NODE_INITIALIZED_LABEL)
            .is_some_and(|v| v == "true")
    }

    pub fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}
