pub mod nodeclaim;
pub mod nodepool;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to the node-class object backing a pool or claim. The scale-down
/// controller only compares it against the registered class catalog; the
/// referenced object is never fetched.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}
