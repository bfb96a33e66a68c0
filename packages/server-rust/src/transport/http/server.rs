//! HTTP transport server lifecycle.
//!
//! Follows a deferred startup pattern: [`HttpServerBuilder::build`] only
//! allocates state, [`Server::endpoint`] binds the listener (so the
//! advertised address is known before registration), and [`Server::start`]
//! serves on that listener until [`Server::stop`] or the base context ends.
//!
//! `stop` drains gracefully while its context is live. Once that context is
//! done the serve loop is dropped and calls still in flight are cancelled, so
//! `start` returns within the caller's deadline.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use strato_core::log::{default_logger, log_or_warn, Level, Logger};
use strato_core::{Context, Handler, Kind, Matcher, Middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::dispatch::{router, DispatchState};
use crate::transport::{endpoint_string, Interceptor, Readiness, Server};

/// Listener and per-call settings of an [`HttpServer`].
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Address to bind, `host:port`. Port 0 picks an ephemeral port.
    pub address: String,
    /// Advertised endpoint. When unset it is derived from the bound address.
    pub endpoint: Option<Url>,
    /// Per-call timeout; zero disables it.
    pub timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:0".to_string(),
            endpoint: None,
            timeout: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[must_use]
pub struct HttpServerBuilder {
    config: HttpServerConfig,
    matcher: Matcher,
    routes: HashMap<String, Handler>,
    logger: Arc<dyn Logger>,
}

impl HttpServerBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Default middleware applied to every operation.
    pub fn middleware(mut self, chain: Vec<Middleware>) -> Self {
        self.matcher.use_middleware(chain);
        self
    }

    /// Middleware for operations matching `selector` (exact, or prefix with a trailing `*`).
    pub fn middleware_for(mut self, selector: &str, chain: Vec<Middleware>) -> Self {
        self.matcher.add(selector, chain);
        self
    }

    /// Serves `handler` for `operation`, e.g. `/helloworld.Greeter/SayHello`.
    pub fn route(mut self, operation: impl Into<String>, handler: Handler) -> Self {
        self.routes.insert(operation.into(), handler);
        self
    }

    pub fn build(self) -> HttpServer {
        let interceptor = Interceptor::new(Kind::Http, self.matcher, self.config.timeout);
        HttpServer {
            config: self.config,
            interceptor: Arc::new(interceptor),
            routes: Arc::new(self.routes),
            logger: self.logger,
            listener: Mutex::new(None),
            endpoint: Mutex::new(None),
            shutdown: CancellationToken::new(),
            force: CancellationToken::new(),
            stopped: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpServer
// ---------------------------------------------------------------------------

pub struct HttpServer {
    config: HttpServerConfig,
    interceptor: Arc<Interceptor>,
    routes: Arc<HashMap<String, Handler>>,
    logger: Arc<dyn Logger>,
    /// Bound by `endpoint()` or `start()`, consumed by `start()`.
    listener: Mutex<Option<std::net::TcpListener>>,
    endpoint: Mutex<Option<Url>>,
    shutdown: CancellationToken,
    /// Abandons the graceful drain once the stop context is done.
    force: CancellationToken,
    /// Cancelled once `start` has returned.
    stopped: CancellationToken,
    started: AtomicBool,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder {
            config: HttpServerConfig::default(),
            matcher: Matcher::new(),
            routes: HashMap::new(),
            logger: default_logger(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Resolves (and caches) the advertised endpoint, binding the listener
    /// if no endpoint was configured.
    fn resolve_endpoint(&self) -> anyhow::Result<Url> {
        let mut cached = self.endpoint.lock();
        if let Some(url) = cached.as_ref() {
            return Ok(url.clone());
        }
        let url = match &self.config.endpoint {
            Some(url) => url.clone(),
            None => advertised(self.bind()?)?,
        };
        self.interceptor.set_endpoint(endpoint_string(&url));
        *cached = Some(url.clone());
        Ok(url)
    }

    fn bind(&self) -> anyhow::Result<SocketAddr> {
        let mut slot = self.listener.lock();
        if let Some(listener) = slot.as_ref() {
            return Ok(listener.local_addr()?);
        }
        let listener = std::net::TcpListener::bind(&self.config.address)
            .with_context(|| format!("bind {}", self.config.address))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        *slot = Some(listener);
        Ok(addr)
    }

    async fn serve(&self, ctx: &Context, ready: Readiness) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.resolve_endpoint()?;
        self.bind()?;
        let std_listener = self
            .listener
            .lock()
            .take()
            .context("listener already consumed")?;
        let listener = TcpListener::from_std(std_listener)?;
        let addr = listener.local_addr()?;

        // Calls merge with this context; cancelling it aborts them.
        let serving = ctx.child();
        self.interceptor.set_base(serving.clone());
        let app = router(DispatchState {
            interceptor: Arc::clone(&self.interceptor),
            routes: Arc::clone(&self.routes),
        });

        log_or_warn(
            self.logger.as_ref(),
            Level::Info,
            &[&"msg", &format!("[HTTP] server listening on: {addr}")],
        );
        ready.ready();

        let shutdown = self.shutdown.clone();
        let base = ctx.token().clone();
        let graceful = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = base.cancelled() => {}
                }
            })
            .into_future();

        let result = tokio::select! {
            result = graceful => result.map_err(anyhow::Error::from),
            () = self.force.cancelled() => {
                log_or_warn(
                    self.logger.as_ref(),
                    Level::Warn,
                    &[&"msg", &"[HTTP] stop deadline reached, abandoning in-flight calls"],
                );
                Ok(())
            }
        };
        serving.cancel();
        result
    }
}

#[async_trait]
impl Server for HttpServer {
    fn kind(&self) -> Kind {
        Kind::Http
    }

    async fn start(&self, ctx: &Context, ready: Readiness) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("http server already started");
        }
        let result = self.serve(ctx, ready).await;
        self.stopped.cancel();
        result
    }

    async fn stop(&self, ctx: &Context) -> anyhow::Result<()> {
        self.shutdown.cancel();
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        log_or_warn(
            self.logger.as_ref(),
            Level::Info,
            &[&"msg", &"[HTTP] server stopping"],
        );

        // Detached: the caller may drop this future at that same deadline.
        let force = self.force.clone();
        let stopped = self.stopped.clone();
        let deadline = ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = stopped.cancelled() => {}
                _ = deadline.done() => force.cancel(),
            }
        });

        ctx.run(self.stopped.cancelled()).await?;
        Ok(())
    }

    fn endpoint(&self) -> Option<anyhow::Result<Url>> {
        Some(self.resolve_endpoint())
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<_> = self.routes.keys().collect();
        operations.sort();
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("operations", &operations)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Advertised URL for a bound address; unspecified hosts are reported as loopback.
fn advertised(addr: SocketAddr) -> anyhow::Result<Url> {
    let ip = if addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        addr.ip()
    };
    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Url::parse(&format!("http://{host}:{}", addr.port())).context("build endpoint url")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
