//! Transport servers driven by the application orchestrator.
//!
//! - [`Server`]: the start/stop contract every transport implements
//! - [`Readiness`]: one-shot barrier a server fires once it accepts traffic
//! - [`interceptor`]: transport-agnostic per-call pipeline
//! - [`http`]: JSON-over-HTTP RPC server built on axum

pub mod http;
pub mod interceptor;

use async_trait::async_trait;
use strato_core::{Context, Kind};
use tokio::sync::oneshot;
use url::{Position, Url};

pub use interceptor::Interceptor;

/// A transport server owned by an `App`.
///
/// `start` blocks for the lifetime of the server and returns once it has been
/// stopped (or failed). `stop` must make a concurrent `start` return, must be
/// safe to call before `start` ever ran, and must respect the deadline of
/// the context it is given.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    fn kind(&self) -> Kind;

    /// Serves until stopped. Call `ready.ready()` once the server accepts
    /// traffic; registration waits on it.
    async fn start(&self, ctx: &Context, ready: Readiness) -> anyhow::Result<()>;

    async fn stop(&self, ctx: &Context) -> anyhow::Result<()>;

    /// The externally reachable address of this server, if it has one.
    /// Resolving may bind the listening socket.
    fn endpoint(&self) -> Option<anyhow::Result<Url>> {
        None
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Fired by a server once it is accepting traffic.
///
/// Dropping a `Readiness` without firing it tells the waiting side that the
/// server will never become ready.
#[derive(Debug)]
pub struct Readiness(oneshot::Sender<()>);

/// Waiting half of a [`Readiness`].
pub type ReadyWait = oneshot::Receiver<()>;

impl Readiness {
    #[must_use]
    pub fn new() -> (Self, ReadyWait) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn ready(self) {
        // Receiver gone means nobody is waiting any more.
        let _ = self.0.send(());
    }
}

/// Renders an endpoint URL for a registry.
///
/// The port is always written out, including a scheme's default port that
/// `url` normalises away, and the bare `/` path `url` adds is dropped.
#[must_use]
pub fn endpoint_string(url: &Url) -> String {
    let mut rendered = url.as_str().to_string();
    if url.port().is_none() && url.has_host() {
        if let Some(port) = url.port_or_known_default() {
            let at = url[..Position::AfterHost].len();
            rendered.insert_str(at, &format!(":{port}"));
        }
    }
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        rendered.truncate(rendered.trim_end_matches('/').len());
    }
    rendered
}
