//! Node-selection contracts carried on a call's transport descriptor.
//!
//! Balancing policies live outside this crate; only the node shape and the
//! filter signature are shared.

use std::collections::HashMap;
use std::sync::Arc;

/// A candidate backend instance.
pub trait Node: Send + Sync {
    /// Endpoint scheme, e.g. `http` or `grpc`.
    fn scheme(&self) -> &str;

    /// `host:port` of the node.
    fn address(&self) -> &str;

    fn service_name(&self) -> &str;

    /// Weight a balancer starts from, if the node advertises one.
    fn initial_weight(&self) -> Option<i64>;

    fn version(&self) -> &str;

    fn metadata(&self) -> &HashMap<String, String>;
}

/// Narrows a candidate set before a balancer picks from it.
pub type NodeFilter = Arc<dyn Fn(Vec<Arc<dyn Node>>) -> Vec<Arc<dyn Node>> + Send + Sync>;

/// Applies `filters` in order.
#[must_use]
pub fn apply_filters(filters: &[NodeFilter], nodes: Vec<Arc<dyn Node>>) -> Vec<Arc<dyn Node>> {
    filters.iter().fold(nodes, |nodes, filter| filter(nodes))
}

/// Keeps nodes whose version equals `version`.
#[must_use]
pub fn version_filter(version: impl Into<String>) -> NodeFilter {
    let version = version.into();
    Arc::new(move |nodes: Vec<Arc<dyn Node>>| {
        nodes
            .into_iter()
            .filter(|n| n.version() == version)
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
