use crate::crd::nodepool::NodePool;

use std::collections::HashSet;

/// Decides whether a pool's node-class reference resolves to a class this
/// deployment owns. The scale-down controller treats node classes purely as
/// identities; anything that can answer this question is a valid catalog.
pub trait NodeClassCatalog: Send + Sync {
    fn is_managed(&self, pool: &NodePool) -> bool;
}

/// Catalog backed by a fixed set of registered `group/Kind` pairs, built once
/// at process start.
#[derive(Clone, Debug, Default)]
pub struct StaticNodeClassCatalog {
    classes: HashSet<String>,
}

impl StaticNodeClassCatalog {
    pub fn new<I>(classes: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|(group, kind)| format!("{group}/{kind}"))
                .collect(),
        }
    }

    pub fn register(&mut self, group: &str, kind: &str) {
        self.classes.insert(format!("{group}/{kind}"));
    }
}

impl NodeClassCatalog for StaticNodeClassCatalog {
    fn is_managed(&self, pool: &NodePool) -> bool {
        pool.node_class_ref()
            .is_some_and(|r| self.classes.contains(&format!("{}/{}", r.group, r.kind)))
    }
}
