//! Application lifecycle.
//!
//! `App::run` drives the whole life of a service:
//!
//! 1. build the registry-facing [`ServiceInstance`] (endpoints resolved once)
//! 2. run `before_start` hooks in order, failing fast
//! 3. start every server concurrently under a supervisor, each paired with a
//!    stop task armed on the group context
//! 4. once every server reported ready, register the instance
//! 5. run `after_start` hooks and start watching for shutdown signals
//! 6. on signal, `stop()`, base-context cancellation or the first server
//!    failure: `before_stop` hooks, deregister, cancel, wait for servers
//! 7. run every `after_stop` hook and report the root error
//!
//! Teardown contexts (server stop, deregistration, `after_stop` hooks) derive
//! from the base context, never from the cancelled lifecycle context. If the
//! base context itself has been cancelled they derive from a fresh root so
//! teardown still happens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use strato_core::log::{log_or_warn, Level};
use strato_core::{Context, ContextError, ServiceInstance};

use super::config::{AppBuilder, AppConfig, Hook};
use super::context::{AppInfo, LifecycleContext};
use super::error::{AppError, HookPhase};
use super::signal::{OsSignals, SignalSource};
use super::supervisor::Supervisor;
use crate::transport::{endpoint_string, Readiness, ReadyWait};

/// Lifecycle state of an [`App`].
///
/// `Created -> Instantiating -> Starting -> Serving -> Stopping -> Stopped`.
/// `stop()` can move any earlier state straight to `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Instantiating,
    Starting,
    Serving,
    Stopping,
    Stopped,
}

/// A service process: a set of servers, lifecycle hooks and an optional
/// registrar. Cloning is cheap; clones drive the same application.
#[derive(Clone)]
pub struct App {
    inner: Arc<Inner>,
}

struct Inner {
    config: AppConfig,
    /// Child of the base context; cancelled by `stop()`.
    lifecycle: Context,
    phase: Mutex<Phase>,
    /// Written once, at the start of `run`.
    instance: Mutex<Option<Arc<ServiceInstance>>>,
    registered: AtomicBool,
    signal_source: Mutex<Option<Box<dyn SignalSource>>>,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    pub(crate) fn from_config(config: AppConfig, signal_source: Option<Box<dyn SignalSource>>) -> Self {
        let lifecycle = config.context.child();
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle,
                phase: Mutex::new(Phase::Created),
                instance: Mutex::new(None),
                registered: AtomicBool::new(false),
                signal_source: Mutex::new(signal_source),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    /// The registry-facing instance, once `run` has built it.
    #[must_use]
    pub fn instance(&self) -> Option<Arc<ServiceInstance>> {
        self.inner.instance.lock().clone()
    }

    /// Runs the application until it is stopped.
    ///
    /// # Errors
    ///
    /// Returns the root cause of the shutdown: a hook, registration or
    /// server failure, or a configuration error if `run` is called twice.
    /// Plain cancellation is not an error.
    pub async fn run(&self) -> Result<(), AppError> {
        if !self.advance(Phase::Created, Phase::Instantiating) {
            return Err(AppError::Configuration(
                "run may be called only once, and not after stop".into(),
            ));
        }

        let instance = match self.build_instance() {
            Ok(instance) => Arc::new(instance),
            Err(err) => {
                self.set_phase(Phase::Stopped);
                return Err(err);
            }
        };
        *self.inner.instance.lock() = Some(Arc::clone(&instance));
        self.log(
            Level::Info,
            &format!(
                "app {} ({}) version={} endpoints={:?}",
                instance.name, instance.id, instance.version, instance.endpoints
            ),
        );

        if !self.advance(Phase::Instantiating, Phase::Starting) {
            // Stopped before anything started.
            self.set_phase(Phase::Stopped);
            return Ok(());
        }

        let hook_ctx = LifecycleContext::new(self.clone(), self.inner.lifecycle.clone());
        if let Err(err) = run_hooks(HookPhase::BeforeStart, &self.config().before_start, &hook_ctx).await {
            self.set_phase(Phase::Stopped);
            return Err(err);
        }

        let group = self.inner.lifecycle.child();
        let mut supervisor = Supervisor::new(group.clone());
        let barrier = self.spawn_servers(&mut supervisor, &group);

        let mut root_err = None;
        if await_ready(barrier, &group).await {
            root_err = self
                .enter_serving(&instance, &hook_ctx, &mut supervisor, &group)
                .await
                .err();
        }

        let task_err = supervisor.wait().await;
        // No-op if a signal or an explicit stop already ran it.
        let stop_err = self.stop().await.err();
        // Covers a registration that completed while stop() was running.
        let late_err = self.deregister().await.err();

        let root_err = root_err.or(task_err).or(stop_err).or(late_err);
        let after_err = self.run_after_stop().await;
        self.set_phase(Phase::Stopped);
        self.log(Level::Info, "app stopped");

        match root_err.or(after_err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Begins graceful shutdown: `before_stop` hooks (only if the app was
    /// serving), deregistration, then cancellation of the lifecycle context.
    ///
    /// Idempotent: only the first call acts; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the first `before_stop` hook or deregistration failure.
    /// Deregistration and cancellation happen regardless.
    pub async fn stop(&self) -> Result<(), AppError> {
        let previous = {
            let mut phase = self.inner.phase.lock();
            match *phase {
                Phase::Stopping | Phase::Stopped => return Ok(()),
                current => {
                    *phase = Phase::Stopping;
                    current
                }
            }
        };
        self.log(Level::Info, "app stopping");

        let mut first_err = None;
        if previous == Phase::Serving {
            let hook_ctx = LifecycleContext::new(self.clone(), self.inner.lifecycle.clone());
            if let Err(err) = run_hooks(HookPhase::BeforeStop, &self.config().before_stop, &hook_ctx).await {
                first_err = Some(err);
            }
        }
        if let Err(err) = self.deregister().await {
            if first_err.is_none() {
                first_err = Some(err);
            } else {
                tracing::warn!(error = %err, "deregistration failed during shutdown");
            }
        }
        self.inner.lifecycle.cancel();

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- start ---------------------------------------------------------------

    fn build_instance(&self) -> Result<ServiceInstance, AppError> {
        let config = self.config();
        let mut endpoints = config.endpoints.clone();
        if endpoints.is_empty() {
            for server in &config.servers {
                if let Some(resolved) = server.endpoint() {
                    let url = resolved.map_err(|err| {
                        AppError::Configuration(format!("resolve {} endpoint: {err:#}", server.kind()))
                    })?;
                    endpoints.push(endpoint_string(&url));
                }
            }
        }
        Ok(ServiceInstance {
            id: config.id.clone(),
            name: config.name.clone(),
            version: config.version.clone(),
            metadata: config.metadata.clone(),
            endpoints,
        })
    }

    /// Spawns a start task and an armed stop task per server and returns the
    /// readiness barrier.
    fn spawn_servers(&self, supervisor: &mut Supervisor, group: &Context) -> Vec<ReadyWait> {
        let config = self.config();
        let mut barrier = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let stop_timeout = config.stop_timeout;
            {
                let server = Arc::clone(server);
                let group = group.clone();
                let app = self.clone();
                supervisor.spawn(async move {
                    group.token().cancelled().await;
                    let parent = app.teardown_context();
                    let ctx = if stop_timeout.is_zero() {
                        parent
                    } else {
                        parent.with_timeout(stop_timeout)
                    };
                    let outcome = ctx.run(server.stop(&ctx)).await;
                    ctx.cancel();
                    match outcome {
                        Ok(stopped) => stopped.map_err(AppError::server),
                        Err(err) => Err(AppError::server(anyhow::Error::from(err).context(
                            format!("{} server did not stop in time", server.kind()),
                        ))),
                    }
                });
            }

            let (ready, wait) = Readiness::new();
            barrier.push(wait);
            let server = Arc::clone(server);
            let base = config.context.clone();
            supervisor.spawn(async move { server.start(&base, ready).await.map_err(AppError::server) });
        }
        barrier
    }

    /// Registers, runs `after_start` hooks and arms signal handling.
    async fn enter_serving(
        &self,
        instance: &ServiceInstance,
        hook_ctx: &LifecycleContext,
        supervisor: &mut Supervisor,
        group: &Context,
    ) -> Result<(), AppError> {
        if let Err(err) = self.register(instance, group).await {
            group.cancel();
            return if err.is_cancellation() { Ok(()) } else { Err(err) };
        }

        if let Err(err) = run_hooks(HookPhase::AfterStart, &self.config().after_start, hook_ctx).await {
            // Unwind through stop() so the instance is deregistered.
            if let Err(stop_err) = self.stop().await {
                tracing::warn!(error = %stop_err, "shutdown after failed after-start hook");
            }
            return Err(err);
        }

        if self.advance(Phase::Starting, Phase::Serving) {
            self.log(Level::Info, "app serving");
            if let Err(err) = self.watch_signals(supervisor, group) {
                if let Err(stop_err) = self.stop().await {
                    tracing::warn!(error = %stop_err, "shutdown after signal setup failure");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn watch_signals(&self, supervisor: &mut Supervisor, group: &Context) -> Result<(), AppError> {
        let injected = self.inner.signal_source.lock().take();
        let mut source: Box<dyn SignalSource> = match injected {
            Some(source) => source,
            None => Box::new(OsSignals::new(&self.config().signals).map_err(|err| {
                AppError::Configuration(format!("install signal handlers: {err}"))
            })?),
        };

        let signals = self.config().signals.clone();
        let app = self.clone();
        let group = group.clone();
        supervisor.spawn(async move {
            loop {
                tokio::select! {
                    () = group.token().cancelled() => return Ok(()),
                    received = source.recv() => match received {
                        Some(signal) if signals.contains(&signal) => {
                            app.log(Level::Info, &format!("received {signal}, stopping"));
                            return app.stop().await;
                        }
                        Some(signal) => tracing::debug!(%signal, "ignoring unconfigured signal"),
                        None => {
                            group.token().cancelled().await;
                            return Ok(());
                        }
                    },
                }
            }
        });
        Ok(())
    }

    // -- registry ------------------------------------------------------------

    async fn register(&self, instance: &ServiceInstance, group: &Context) -> Result<(), AppError> {
        let Some(registrar) = self.config().registrar.as_ref() else {
            return Ok(());
        };
        let ctx = group.with_timeout(self.config().registrar_timeout);
        let outcome = ctx.run(registrar.register(&ctx, instance)).await;
        ctx.cancel();
        match outcome {
            Ok(Ok(())) => {
                self.inner.registered.store(true, Ordering::SeqCst);
                self.log(Level::Info, &format!("registered instance {}", instance.id));
                Ok(())
            }
            Ok(Err(err)) => Err(AppError::Registration(err)),
            Err(ContextError::Canceled) => Err(AppError::Context(ContextError::Canceled)),
            Err(err) => Err(AppError::Registration(err.into())),
        }
    }

    /// Deregisters exactly once per successful registration.
    async fn deregister(&self) -> Result<(), AppError> {
        if !self.inner.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let (Some(registrar), Some(instance)) = (self.config().registrar.as_ref(), self.instance()) else {
            return Ok(());
        };
        let ctx = self.teardown_context().with_timeout(self.config().registrar_timeout);
        let outcome = ctx.run(registrar.deregister(&ctx, &instance)).await;
        ctx.cancel();
        match outcome {
            Ok(Ok(())) => {
                self.log(Level::Info, &format!("deregistered instance {}", instance.id));
                Ok(())
            }
            Ok(Err(err)) => Err(AppError::Deregistration(err)),
            Err(err) => Err(AppError::Deregistration(err.into())),
        }
    }

    // -- stop ----------------------------------------------------------------

    /// Runs every `after_stop` hook; the last failure wins.
    async fn run_after_stop(&self) -> Option<AppError> {
        let hook_ctx = LifecycleContext::new(self.clone(), self.teardown_context());
        let mut last = None;
        for hook in &self.config().after_stop {
            if let Err(source) = hook(hook_ctx.clone()).await {
                tracing::warn!(error = %source, "after-stop hook failed");
                last = Some(AppError::Hook {
                    phase: HookPhase::AfterStop,
                    source,
                });
            }
        }
        last
    }

    /// A live context for teardown work: a child of the base context, or of a
    /// fresh root once the base context is done.
    fn teardown_context(&self) -> Context {
        let base = &self.config().context;
        if base.is_done() {
            Context::background()
        } else {
            base.child()
        }
    }

    // -- state ---------------------------------------------------------------

    fn advance(&self, from: Phase, to: Phase) -> bool {
        let mut phase = self.inner.phase.lock();
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }

    fn set_phase(&self, to: Phase) {
        *self.inner.phase.lock() = to;
    }

    fn log(&self, level: Level, msg: &str) {
        log_or_warn(self.config().logger.as_ref(), level, &[&"msg", &msg]);
    }
}

impl AppInfo for App {
    fn id(&self) -> &str {
        &self.config().id
    }

    fn name(&self) -> &str {
        &self.config().name
    }

    fn version(&self) -> &str {
        &self.config().version
    }

    fn metadata(&self) -> &HashMap<String, String> {
        &self.config().metadata
    }

    fn endpoints(&self) -> Vec<String> {
        self.instance()
            .map(|instance| instance.endpoints.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("id", &self.config().id)
            .field("name", &self.config().name)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Runs `hooks` in order, stopping at the first failure.
async fn run_hooks(phase: HookPhase, hooks: &[Hook], ctx: &LifecycleContext) -> Result<(), AppError> {
    for hook in hooks {
        hook(ctx.clone())
            .await
            .map_err(|source| AppError::Hook { phase, source })?;
    }
    Ok(())
}

/// Waits until every server is ready. Returns `false` if the group ended first
/// or a server exited without ever becoming ready.
async fn await_ready(barrier: Vec<ReadyWait>, group: &Context) -> bool {
    tokio::select! {
        biased;
        () = group.token().cancelled() => false,
        joined = try_join_all(barrier) => {
            if joined.is_ok() {
                true
            } else {
                tracing::warn!("a server exited before becoming ready; shutting down");
                group.cancel();
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use strato_core::log::DiscardLogger;
    use strato_core::registry::MemoryRegistrar;
    use strato_core::{Kind, Registrar};
    use tokio::sync::mpsc::UnboundedSender;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::*;
    use crate::app::config::hook_fn;
    use crate::app::signal::{signal_channel, Signal};
    use crate::transport::Server;

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    /// Server that serves until its token is cancelled.
    struct MockServer {
        name: &'static str,
        log: Log,
        fail_start: bool,
        ready_delay: Duration,
        ready_flag: Arc<AtomicBool>,
        hang_on_stop: bool,
        endpoint_error: bool,
        done: CancellationToken,
    }

    impl MockServer {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail_start: false,
                ready_delay: Duration::ZERO,
                ready_flag: Arc::new(AtomicBool::new(false)),
                hang_on_stop: false,
                endpoint_error: false,
                done: CancellationToken::new(),
            }
        }
    }

    #[async_trait]
    impl Server for MockServer {
        fn kind(&self) -> Kind {
            Kind::Grpc
        }

        async fn start(&self, _ctx: &Context, ready: Readiness) -> anyhow::Result<()> {
            self.log.lock().push(format!("start:{}", self.name));
            if self.fail_start {
                anyhow::bail!("{} failed to bind", self.name);
            }
            tokio::time::sleep(self.ready_delay).await;
            self.ready_flag.store(true, Ordering::SeqCst);
            ready.ready();
            self.done.cancelled().await;
            Ok(())
        }

        async fn stop(&self, _ctx: &Context) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            self.done.cancel();
            if self.hang_on_stop {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        fn endpoint(&self) -> Option<anyhow::Result<Url>> {
            if self.endpoint_error {
                return Some(Err(anyhow::anyhow!("address already in use")));
            }
            Some(Ok(Url::parse("grpc://127.0.0.1:9000").unwrap()))
        }
    }

    /// Registrar appending `register:<id>` / `deregister:<id>` to the log.
    struct RecordingRegistrar {
        log: Log,
        fail_register: bool,
        observe_ready: Option<Arc<AtomicBool>>,
    }

    impl RecordingRegistrar {
        fn new(log: &Log) -> Self {
            Self {
                log: Arc::clone(log),
                fail_register: false,
                observe_ready: None,
            }
        }
    }

    #[async_trait]
    impl Registrar for RecordingRegistrar {
        async fn register(&self, _ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()> {
            if let Some(flag) = &self.observe_ready {
                let ready = flag.load(Ordering::SeqCst);
                self.log.lock().push(format!("ready-at-register:{ready}"));
            }
            if self.fail_register {
                anyhow::bail!("registry unavailable");
            }
            self.log.lock().push(format!("register:{}", instance.id));
            Ok(())
        }

        async fn deregister(&self, _ctx: &Context, instance: &ServiceInstance) -> anyhow::Result<()> {
            self.log.lock().push(format!("deregister:{}", instance.id));
            Ok(())
        }
    }

    fn logging_hook(log: &Log, entry: &'static str) -> Hook {
        let log = Arc::clone(log);
        hook_fn(move |_ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(entry.to_string());
                Ok(())
            }
        })
    }

    fn signal_hook(tx: &UnboundedSender<Signal>, signals: &'static [Signal]) -> Hook {
        let tx = tx.clone();
        hook_fn(move |_ctx| {
            for &signal in signals {
                let _ = tx.send(signal);
            }
            async { Ok(()) }
        })
    }

    fn failing_hook(msg: &'static str) -> Hook {
        hook_fn(move |_ctx| async move { Err(anyhow::anyhow!(msg)) })
    }

    fn base_builder(log: &Log) -> AppBuilder {
        App::builder()
            .id("instance-1")
            .name("greeter")
            .version("v1")
            .logger(Arc::new(DiscardLogger))
            .registrar(Arc::new(RecordingRegistrar::new(log)))
    }

    #[tokio::test]
    async fn full_lifecycle_runs_hooks_in_order() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(source)
            .before_start(logging_hook(&log, "before-start"))
            .after_start(logging_hook(&log, "after-start"))
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .before_stop(logging_hook(&log, "before-stop"))
            .after_stop(logging_hook(&log, "after-stop"))
            .build()
            .unwrap();

        app.run().await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "before-start",
                "start:a",
                "register:instance-1",
                "after-start",
                "before-stop",
                "deregister:instance-1",
                "stop:a",
                "after-stop",
            ]
        );
        assert_eq!(app.phase(), Phase::Stopped);
        assert_eq!(app.endpoints(), vec!["grpc://127.0.0.1:9000"]);
    }

    #[tokio::test]
    async fn failing_server_stops_the_others_and_skips_registration() {
        let log = new_log();
        let failing = MockServer {
            fail_start: true,
            ..MockServer::new("b", &log)
        };
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .server(Arc::new(failing))
            .signal_source(signal_channel().1)
            .after_start(logging_hook(&log, "after-start"))
            .after_stop(logging_hook(&log, "after-stop"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Server(_)));
        assert!(err.to_string().contains("b failed to bind"));

        let log = entries(&log);
        assert!(log.contains(&"stop:a".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("register:")));
        assert!(!log.iter().any(|e| e.starts_with("deregister:")));
        assert!(!log.contains(&"after-start".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("after-stop"));
    }

    #[tokio::test]
    async fn repeated_signals_shut_down_once() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Int, Signal::Term, Signal::Quit]))
            .before_stop(logging_hook(&log, "before-stop"))
            .build()
            .unwrap();

        app.run().await.unwrap();
        app.stop().await.unwrap();

        let log = entries(&log);
        let count = |entry: &str| log.iter().filter(|e| e.as_str() == entry).count();
        assert_eq!(count("before-stop"), 1);
        assert_eq!(count("deregister:instance-1"), 1);
        assert_eq!(count("stop:a"), 1);
    }

    #[tokio::test]
    async fn unconfigured_signal_is_ignored() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signals([Signal::Term])
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Hup]))
            .build()
            .unwrap();

        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(app.phase(), Phase::Serving);

        tx.send(Signal::Term).unwrap();
        runner.await.unwrap().unwrap();
        assert_eq!(app.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn failing_before_stop_still_deregisters() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .before_stop(failing_hook("flush failed"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Hook { phase: HookPhase::BeforeStop, .. }));

        let log = entries(&log);
        assert!(log.contains(&"deregister:instance-1".to_string()));
        assert!(log.contains(&"stop:a".to_string()));
    }

    #[tokio::test]
    async fn registration_waits_for_readiness() {
        let log = new_log();
        let server = MockServer {
            ready_delay: Duration::from_millis(30),
            ..MockServer::new("slow", &log)
        };
        let registrar = RecordingRegistrar {
            observe_ready: Some(Arc::clone(&server.ready_flag)),
            ..RecordingRegistrar::new(&log)
        };
        let (tx, source) = signal_channel();
        let app = App::builder()
            .id("instance-1")
            .name("greeter")
            .logger(Arc::new(DiscardLogger))
            .registrar(Arc::new(registrar))
            .server(Arc::new(server))
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .build()
            .unwrap();

        app.run().await.unwrap();
        assert!(entries(&log).contains(&"ready-at-register:true".to_string()));
    }

    #[tokio::test]
    async fn registration_failure_is_fatal() {
        let log = new_log();
        let registrar = RecordingRegistrar {
            fail_register: true,
            ..RecordingRegistrar::new(&log)
        };
        let app = App::builder()
            .name("greeter")
            .logger(Arc::new(DiscardLogger))
            .registrar(Arc::new(registrar))
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(signal_channel().1)
            .after_start(logging_hook(&log, "after-start"))
            .before_stop(logging_hook(&log, "before-stop"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Registration(_)));

        let log = entries(&log);
        assert!(log.contains(&"stop:a".to_string()));
        assert!(!log.contains(&"after-start".to_string()));
        assert!(!log.contains(&"before-stop".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("deregister:")));
    }

    #[tokio::test]
    async fn failing_before_start_starts_nothing() {
        let log = new_log();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(signal_channel().1)
            .before_start(failing_hook("migrations failed"))
            .after_stop(logging_hook(&log, "after-stop"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Hook { phase: HookPhase::BeforeStart, .. }));
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn failing_after_start_deregisters_and_reports() {
        let log = new_log();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(signal_channel().1)
            .after_start(failing_hook("warmup failed"))
            .before_stop(logging_hook(&log, "before-stop"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Hook { phase: HookPhase::AfterStart, .. }));

        let log = entries(&log);
        assert!(log.contains(&"deregister:instance-1".to_string()));
        assert!(log.contains(&"stop:a".to_string()));
        // The app never reached serving.
        assert!(!log.contains(&"before-stop".to_string()));
    }

    #[tokio::test]
    async fn explicit_stop_ends_run() {
        let log = new_log();
        let app = base_builder(&log)
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(signal_channel().1)
            .before_stop(logging_hook(&log, "before-stop"))
            .build()
            .unwrap();

        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        while app.phase() != Phase::Serving {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        app.stop().await.unwrap();
        runner.await.unwrap().unwrap();

        let log = entries(&log);
        assert!(log.contains(&"before-stop".to_string()));
        assert!(log.contains(&"deregister:instance-1".to_string()));
    }

    #[tokio::test]
    async fn cancelled_base_context_tears_down() {
        let log = new_log();
        let base = Context::background();
        let app = base_builder(&log)
            .context(base.clone())
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(signal_channel().1)
            .build()
            .unwrap();

        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        while app.phase() != Phase::Serving {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        base.cancel();
        runner.await.unwrap().unwrap();

        let log = entries(&log);
        assert!(log.contains(&"stop:a".to_string()));
        assert!(log.contains(&"deregister:instance-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_timeout_bounds_a_hanging_server() {
        let log = new_log();
        let hanging = MockServer {
            hang_on_stop: true,
            ..MockServer::new("stuck", &log)
        };
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .server(Arc::new(hanging))
            .stop_timeout(Duration::from_millis(100))
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, AppError::Server(_)));
        assert!(err.to_string().contains("did not stop in time"));
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .build()
            .unwrap();

        app.run().await.unwrap();
        assert!(matches!(app.run().await, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn stop_before_run_prevents_running() {
        let log = new_log();
        let app = base_builder(&log).build().unwrap();
        app.stop().await.unwrap();
        assert!(matches!(app.run().await, Err(AppError::Configuration(_))));
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn explicit_endpoints_skip_server_resolution() {
        let log = new_log();
        let (tx, source) = signal_channel();
        let app = base_builder(&log)
            .endpoint("http://gateway.internal:8080")
            .server(Arc::new(MockServer::new("a", &log)))
            .signal_source(source)
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .build()
            .unwrap();

        app.run().await.unwrap();
        assert_eq!(app.endpoints(), vec!["http://gateway.internal:8080"]);
    }

    #[tokio::test]
    async fn unresolvable_endpoint_fails_before_anything_starts() {
        let log = new_log();
        let broken = MockServer {
            endpoint_error: true,
            ..MockServer::new("a", &log)
        };
        let app = base_builder(&log)
            .server(Arc::new(broken))
            .signal_source(signal_channel().1)
            .before_start(logging_hook(&log, "before-start"))
            .after_start(logging_hook(&log, "after-start"))
            .before_stop(logging_hook(&log, "before-stop"))
            .after_stop(logging_hook(&log, "after-stop"))
            .build()
            .unwrap();

        let err = app.run().await.unwrap_err();
        assert!(matches!(&err, AppError::Configuration(m) if m.contains("address already in use")));
        assert!(entries(&log).is_empty());
        assert!(app.instance().is_none());
        assert_eq!(app.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn memory_registrar_sees_instance_only_while_serving() {
        let registrar = Arc::new(MemoryRegistrar::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, source) = signal_channel();
        let observe = {
            let registrar = Arc::clone(&registrar);
            let seen = Arc::clone(&seen);
            hook_fn(move |ctx: LifecycleContext| {
                let registrar = Arc::clone(&registrar);
                let seen = Arc::clone(&seen);
                async move {
                    let name = ctx.app().name().to_string();
                    seen.lock().push(registrar.instances(&name).len());
                    Ok(())
                }
            })
        };
        let app = App::builder()
            .name("greeter")
            .logger(Arc::new(DiscardLogger))
            .registrar(Arc::clone(&registrar) as Arc<dyn Registrar>)
            .signal_source(source)
            .after_start(observe.clone())
            .after_start(signal_hook(&tx, &[Signal::Term]))
            .after_stop(observe)
            .build()
            .unwrap();

        app.run().await.unwrap();
        assert_eq!(*seen.lock(), vec![1, 0]);
    }
}
