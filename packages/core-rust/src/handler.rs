//! Type-erased call handlers.
//!
//! Every operation is served by a [`Handler`] over JSON payloads so that one
//! middleware chain can wrap any operation. [`typed`] adapts a strongly-typed
//! async function into that shape.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::status::Status;
use crate::transport::CallContext;

/// Request and reply payload.
pub type Payload = serde_json::Value;

/// Outcome of one call.
pub type CallResult = Result<Payload, Status>;

/// A call handler: `(call context, request) -> (reply, error)`.
pub type Handler = Arc<dyn Fn(CallContext, Payload) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    Arc::new(move |ctx: CallContext, req: Payload| -> BoxFuture<'static, CallResult> {
        Box::pin(f(ctx, req))
    })
}

/// Wraps a typed async function as a [`Handler`].
///
/// The request is decoded from the payload (`InvalidArgument` on failure) and
/// the reply is encoded back (`Internal` on failure).
pub fn typed<Req, Rep, F, Fut>(f: F) -> Handler
where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Rep, Status>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |ctx: CallContext, payload: Payload| -> BoxFuture<'static, CallResult> {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let req: Req = serde_json::from_value(payload)
                .map_err(|e| Status::invalid_argument(format!("decode request: {e}")))?;
            let rep = f(ctx, req).await?;
            serde_json::to_value(rep).map_err(|e| Status::internal(format!("encode reply: {e}")))
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
