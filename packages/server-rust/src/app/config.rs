//! Application options and their builder.
//!
//! All options are collected by [`AppBuilder`] and validated once, in
//! [`AppBuilder::build`]. The resulting [`AppConfig`] is immutable.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use strato_core::log::{default_logger, Logger};
use strato_core::{Context, Registrar};
use url::Url;

use super::context::LifecycleContext;
use super::error::AppError;
use super::lifecycle::App;
use super::signal::{Signal, SignalSource, DEFAULT_SIGNALS};
use crate::transport::Server;

/// A lifecycle hook.
pub type Hook = Arc<dyn Fn(LifecycleContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wraps an async closure as a [`Hook`].
pub fn hook_fn<F, Fut>(f: F) -> Hook
where
    F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |ctx: LifecycleContext| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(ctx)) },
    )
}

/// Default bound on each registrar call.
pub const DEFAULT_REGISTRAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated application options.
pub struct AppConfig {
    pub id: String,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    /// Explicit endpoints, validated as URLs and kept exactly as written.
    /// When empty, endpoints are collected from servers.
    pub endpoints: Vec<String>,
    /// Base context; cancelling it ends the application.
    pub context: Context,
    /// Signals that trigger shutdown.
    pub signals: Vec<Signal>,
    pub logger: Arc<dyn Logger>,
    pub registrar: Option<Arc<dyn Registrar>>,
    pub registrar_timeout: Duration,
    /// Bound on each server's `stop`; zero means unbounded.
    pub stop_timeout: Duration,
    pub servers: Vec<Arc<dyn Server>>,
    pub before_start: Vec<Hook>,
    pub after_start: Vec<Hook>,
    pub before_stop: Vec<Hook>,
    pub after_stop: Vec<Hook>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("metadata", &self.metadata)
            .field("endpoints", &self.endpoints)
            .field("signals", &self.signals)
            .field("registrar", &self.registrar.is_some())
            .field("registrar_timeout", &self.registrar_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .field("servers", &self.servers.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AppBuilder
// ---------------------------------------------------------------------------

#[must_use]
pub struct AppBuilder {
    id: Option<String>,
    name: String,
    version: String,
    metadata: HashMap<String, String>,
    endpoints: Vec<String>,
    context: Option<Context>,
    signals: Vec<Signal>,
    signal_source: Option<Box<dyn SignalSource>>,
    logger: Arc<dyn Logger>,
    registrar: Option<Arc<dyn Registrar>>,
    registrar_timeout: Duration,
    stop_timeout: Duration,
    servers: Vec<Arc<dyn Server>>,
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            context: None,
            signals: DEFAULT_SIGNALS.to_vec(),
            signal_source: None,
            logger: default_logger(),
            registrar: None,
            registrar_timeout: DEFAULT_REGISTRAR_TIMEOUT,
            stop_timeout: Duration::ZERO,
            servers: Vec::new(),
            before_start: Vec::new(),
            after_start: Vec::new(),
            before_stop: Vec::new(),
            after_stop: Vec::new(),
        }
    }
}

impl AppBuilder {
    /// Instance id. Defaults to a random UUID.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds an explicit endpoint; validated by [`AppBuilder::build`].
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Replaces the set of shutdown signals.
    pub fn signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.signals = signals.into_iter().collect();
        self
    }

    /// Reads signals from `source` instead of the process.
    pub fn signal_source(mut self, source: impl SignalSource) -> Self {
        self.signal_source = Some(Box::new(source));
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn registrar_timeout(mut self, timeout: Duration) -> Self {
        self.registrar_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn server<S: Server>(mut self, server: Arc<S>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn before_start(mut self, hook: Hook) -> Self {
        self.before_start.push(hook);
        self
    }

    pub fn after_start(mut self, hook: Hook) -> Self {
        self.after_start.push(hook);
        self
    }

    pub fn before_stop(mut self, hook: Hook) -> Self {
        self.before_stop.push(hook);
        self
    }

    pub fn after_stop(mut self, hook: Hook) -> Self {
        self.after_stop.push(hook);
        self
    }

    /// Validates the options and creates the application.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Configuration`] for an empty name, a zero
    /// registrar timeout, or an endpoint that is not an absolute URL.
    pub fn build(self) -> Result<App, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Configuration("app name must not be empty".into()));
        }
        if self.registrar_timeout.is_zero() {
            return Err(AppError::Configuration(
                "registrar timeout must be greater than zero".into(),
            ));
        }
        for raw in &self.endpoints {
            Url::parse(raw)
                .map_err(|err| AppError::Configuration(format!("invalid endpoint {raw:?}: {err}")))?;
        }

        let config = AppConfig {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: self.name,
            version: self.version,
            metadata: self.metadata,
            endpoints: self.endpoints,
            context: self.context.unwrap_or_default(),
            signals: self.signals,
            logger: self.logger,
            registrar: self.registrar,
            registrar_timeout: self.registrar_timeout,
            stop_timeout: self.stop_timeout,
            servers: self.servers,
            before_start: self.before_start,
            after_start: self.after_start,
            before_stop: self.before_stop,
            after_stop: self.after_stop,
        };
        Ok(App::from_config(config, self.signal_source))
    }
}
