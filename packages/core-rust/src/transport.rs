//! Per-call transport descriptor and header carriers.
//!
//! Every inbound call gets a fresh [`Transport`] describing where it arrived
//! and what it is calling. Handlers and middleware reach it through the
//! [`CallContext`] they are invoked with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Context;
use crate::selector::NodeFilter;

/// Transport protocol a call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Grpc,
    Http,
}

impl Kind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HeaderCarrier
// ---------------------------------------------------------------------------

/// Multi-value string header map shared between the transport and handler code.
///
/// Keys are stored lowercased. Clones share the same underlying map, so a
/// handler writing to the reply carrier is seen by the transport that flushes
/// it.
#[derive(Clone, Default)]
pub struct HeaderCarrier {
    inner: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl HeaderCarrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a carrier from `(key, value)` pairs, appending repeated keys.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let carrier = Self::new();
        for (k, v) in pairs {
            carrier.add(k.as_ref(), v);
        }
        carrier
    }

    /// First value for `key`, or the empty string.
    #[must_use]
    pub fn get(&self, key: &str) -> String {
        self.inner
            .read()
            .get(&key.to_ascii_lowercase())
            .and_then(|vals| vals.first().cloned())
            .unwrap_or_default()
    }

    /// Replaces all values for `key`.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.inner
            .write()
            .insert(key.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Appends a value for `key`.
    pub fn add(&self, key: &str, value: impl Into<String>) {
        self.inner
            .write()
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Header names present, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// All values for `key`, empty if absent.
    #[must_use]
    pub fn values(&self, key: &str) -> Vec<String> {
        self.inner
            .read()
            .get(&key.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copies the current contents out.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.inner.read().clone()
    }
}

impl fmt::Debug for HeaderCarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.read().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Immutable identity of one inbound call.
pub struct Transport {
    kind: Kind,
    endpoint: String,
    operation: String,
    request_header: HeaderCarrier,
    reply_header: HeaderCarrier,
    node_filters: Vec<NodeFilter>,
}

impl Transport {
    #[must_use]
    pub fn new(
        kind: Kind,
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        request_header: HeaderCarrier,
        reply_header: HeaderCarrier,
    ) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            operation: operation.into(),
            request_header,
            reply_header,
            node_filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Advertised endpoint of the server that accepted the call; empty if unset.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fully-qualified operation name, e.g. `/helloworld.Greeter/SayHello`.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn request_header(&self) -> &HeaderCarrier {
        &self.request_header
    }

    #[must_use]
    pub fn reply_header(&self) -> &HeaderCarrier {
        &self.reply_header
    }

    #[must_use]
    pub fn node_filters(&self) -> &[NodeFilter] {
        &self.node_filters
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("operation", &self.operation)
            .field("request_header", &self.request_header)
            .field("reply_header", &self.reply_header)
            .field("node_filters", &self.node_filters.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// What a handler is invoked with besides its payload: the call's
/// cancellation scope and its transport descriptor.
#[derive(Debug, Clone)]
pub struct CallContext {
    ctx: Context,
    transport: Arc<Transport>,
}

impl CallContext {
    #[must_use]
    pub fn new(ctx: Context, transport: Arc<Transport>) -> Self {
        Self { ctx, transport }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Same transport, different scope. Middleware uses this to tighten a deadline.
    #[must_use]
    pub fn with_context(&self, ctx: Context) -> Self {
        Self {
            ctx,
            transport: Arc::clone(&self.transport),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
