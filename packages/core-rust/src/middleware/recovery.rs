//! Panic recovery middleware.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{middleware_fn, Middleware};
use crate::handler::{CallResult, Handler, Payload};
use crate::status::Status;
use crate::transport::CallContext;

/// Converts a panic anywhere below this middleware into an `Internal` status.
/// Place it first in the chain so it also covers the other middleware.
#[must_use]
pub fn recovery() -> Middleware {
    middleware_fn(|next: Handler| {
        let wrapped: Handler = Arc::new(
            move |ctx: CallContext, req: Payload| -> BoxFuture<'static, CallResult> {
                let next = Arc::clone(&next);
                let operation = ctx.transport().operation().to_string();
                Box::pin(async move {
                    match AssertUnwindSafe(async move { next(ctx, req).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => {
                            let reason = panic_message(panic.as_ref());
                            tracing::error!(operation = %operation, panic = %reason, "handler panicked");
                            Err(Status::internal(format!("panic: {reason}")))
                        }
                    }
                })
            },
        );
        wrapped
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
