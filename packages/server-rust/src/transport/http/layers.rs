//! Tower layers applied to every HTTP request before dispatch.
//!
//! Ordering is outermost first: the first layer listed sees the request
//! first and the response last.

use axum::http::header::HeaderName;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
        >,
        tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
    >,
>;

/// Builds the transport-level layer stack:
///
/// 1. `SetRequestId` assigns a UUID v4 `x-request-id` unless the client sent one
/// 2. `Trace` opens a span per request
/// 3. `PropagateRequestId` copies the id onto the response
///
/// Operation-level concerns (timeouts, logging, auth) live in the middleware
/// chain run by the interceptor, not here.
#[must_use]
pub fn build_http_layers() -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}
