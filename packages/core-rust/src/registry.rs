//! Service-registry contracts.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::Context;

/// Registry-facing descriptor of one running application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub endpoints: Vec<String>,
}

/// Service-discovery backend that records and removes running instances.
///
/// Calls are bounded by the `ctx` deadline; the orchestrator treats a
/// `register` failure as fatal and a `deregister` failure as reportable but
/// non-blocking.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()>;

    async fn deregister(&self, ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryRegistrar
// ---------------------------------------------------------------------------

/// In-process registrar keyed by service name, then instance id.
#[derive(Debug, Default)]
pub struct MemoryRegistrar {
    services: DashMap<String, HashMap<String, ServiceInstance>>,
}

impl MemoryRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances currently registered under `name`, sorted by id.
    #[must_use]
    pub fn instances(&self, name: &str) -> Vec<ServiceInstance> {
        let mut out: Vec<_> = self
            .services
            .get(name)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[async_trait]
impl Registrar for MemoryRegistrar {
    async fn register(&self, ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        self.services
            .entry(instance.name.clone())
            .or_default()
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn deregister(&self, ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        if let Some(mut entry) = self.services.get_mut(&instance.name) {
            entry.remove(&instance.id);
        }
        self.services.remove_if(&instance.name, |_, ids| ids.is_empty());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
