//! Per-call pipeline shared by every transport.
//!
//! For each inbound call the interceptor:
//!
//! 1. merges the transport's call context with the server's base context
//! 2. builds a fresh reply-header carrier
//! 3. attaches a [`Transport`] descriptor for the call
//! 4. bounds the call with the configured timeout, if any
//! 5. resolves the middleware chain for the operation
//! 6. invokes the (wrapped) handler under the resulting context
//!
//! Flushing the returned reply headers onto the wire is left to the
//! transport, which has to do it on success and on failure alike.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use strato_core::middleware::{self, Matcher};
use strato_core::{CallContext, CallResult, Context, Handler, HeaderCarrier, Kind, Payload, Status, Transport};

pub struct Interceptor {
    kind: Kind,
    timeout: Duration,
    matcher: Matcher,
    /// Server base context, replaced when the server starts.
    base: ArcSwap<Context>,
    /// Advertised endpoint, replaced once it is resolved.
    endpoint: ArcSwap<String>,
}

impl Interceptor {
    /// `timeout` of zero disables the per-call deadline. The matcher is frozen
    /// from here on.
    #[must_use]
    pub fn new(kind: Kind, matcher: Matcher, timeout: Duration) -> Self {
        Self {
            kind,
            timeout,
            matcher,
            base: ArcSwap::from_pointee(Context::background()),
            endpoint: ArcSwap::from_pointee(String::new()),
        }
    }

    pub fn set_base(&self, ctx: Context) {
        self.base.store(Arc::new(ctx));
    }

    pub fn set_endpoint(&self, endpoint: String) {
        self.endpoint.store(Arc::new(endpoint));
    }

    /// Runs one call through the pipeline and returns its outcome together
    /// with the reply headers the handler chain populated.
    pub async fn intercept(
        &self,
        call: &Context,
        operation: &str,
        request_header: HeaderCarrier,
        req: Payload,
        handler: Handler,
    ) -> (CallResult, HeaderCarrier) {
        let reply_header = HeaderCarrier::new();

        let base = self.base.load_full();
        let merged = match Context::merge(call, &base) {
            Ok(ctx) => ctx,
            Err(err) => return (Err(Status::from(err)), reply_header),
        };
        // Releases the merge watcher and any timeout child once the call ends.
        let _release = merged.token().clone().drop_guard();

        let transport = Arc::new(Transport::new(
            self.kind,
            self.endpoint.load().as_str(),
            operation,
            request_header,
            reply_header.clone(),
        ));

        let ctx = if self.timeout.is_zero() {
            merged
        } else {
            merged.with_timeout(self.timeout)
        };

        let chain = self.matcher.match_operation(operation);
        let handler = if chain.is_empty() {
            handler
        } else {
            middleware::apply(&chain, handler)
        };

        let call_ctx = CallContext::new(ctx.clone(), transport);
        let result = match ctx.run(handler(call_ctx, req)).await {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(operation, error = %err, "call abandoned");
                Err(Status::from(err))
            }
        };
        (result, reply_header)
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("matcher", &self.matcher)
            .field("endpoint", &self.endpoint.load())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
