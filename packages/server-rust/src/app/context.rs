//! Context handed to lifecycle hooks.

use strato_core::Context;

use super::lifecycle::App;

/// Read-only view of a running application.
pub trait AppInfo {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn metadata(&self) -> &std::collections::HashMap<String, String>;
    /// Endpoints advertised to the registry. Empty until the service
    /// instance has been built at the start of `run`.
    fn endpoints(&self) -> Vec<String>;
}

/// A lifecycle scope plus the application it belongs to.
///
/// Hooks receive one of these; [`LifecycleContext::app`] recovers the
/// application handle, e.g. to read its advertised endpoints.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    app: App,
    ctx: Context,
}

impl LifecycleContext {
    pub(crate) fn new(app: App, ctx: Context) -> Self {
        Self { app, ctx }
    }

    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}
