//! Access logging middleware.
//!
//! Emits one record per call through the injected [`Logger`]: transport kind,
//! operation, outcome code, failure reason and latency in seconds. Failed
//! calls are logged at `ERROR`, others at `INFO`.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;

use super::{middleware_fn, Middleware};
use crate::handler::{CallResult, Handler, Payload};
use crate::log::{log_or_warn, Level, Logger};
use crate::transport::CallContext;

/// Server-side access log middleware.
#[must_use]
pub fn server(logger: Arc<dyn Logger>) -> Middleware {
    middleware_fn(move |next: Handler| {
        let logger = Arc::clone(&logger);
        let wrapped: Handler = Arc::new(
            move |ctx: CallContext, req: Payload| -> BoxFuture<'static, CallResult> {
                let next = Arc::clone(&next);
                let logger = Arc::clone(&logger);
                Box::pin(async move {
                    let kind = ctx.transport().kind();
                    let operation = ctx.transport().operation().to_string();
                    let start = Instant::now();

                    let result = next(ctx, req).await;

                    let latency = start.elapsed().as_secs_f64();
                    let (level, code, reason) = match &result {
                        Ok(_) => (Level::Info, "OK", String::new()),
                        Err(status) => (Level::Error, status.code.as_str(), status.message.clone()),
                    };
                    log_or_warn(
                        logger.as_ref(),
                        level,
                        &[
                            &"kind",
                            &"server",
                            &"component",
                            &kind,
                            &"operation",
                            &operation,
                            &"code",
                            &code,
                            &"reason",
                            &reason,
                            &"latency",
                            &latency,
                        ],
                    );
                    result
                })
            },
        );
        wrapped
    })
}
