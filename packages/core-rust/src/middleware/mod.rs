//! Call-wrapping middleware.
//!
//! A [`Middleware`] turns a [`Handler`] into another handler of the same
//! shape. Chains compose outermost-first: `chain[0]` sees the call before
//! `chain[1]`, and sees the reply after it.
//!
//! - [`matcher`]: selector-based routing of chains to operations
//! - [`logging`]: per-call access log through the injected `Logger`
//! - [`recovery`]: converts handler panics into `Internal` statuses

pub mod logging;
pub mod matcher;
pub mod recovery;

use std::sync::Arc;

use crate::handler::Handler;

pub use matcher::Matcher;

/// A handler transformer.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Wraps a closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps `handler` in `chain`, outermost first.
#[must_use]
pub fn apply(chain: &[Middleware], handler: Handler) -> Handler {
    chain.iter().rev().fold(handler, |next, m| m(next))
}

/// Collapses `chain` into a single middleware.
#[must_use]
pub fn chain(chain: Vec<Middleware>) -> Middleware {
    Arc::new(move |handler: Handler| apply(&chain, handler))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
