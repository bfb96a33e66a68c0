//! Request dispatch: HTTP request in, interceptor call, HTTP response out.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use strato_core::{Code, Context, Handler, HeaderCarrier, Payload, Status};

use super::layers::build_http_layers;
use crate::transport::Interceptor;

/// Response header carrying the status code name of a failed call.
pub const CODE_HEADER: &str = "x-strato-code";

#[derive(Clone)]
pub(super) struct DispatchState {
    pub(super) interceptor: Arc<Interceptor>,
    pub(super) routes: Arc<HashMap<String, Handler>>,
}

pub(super) fn router(state: DispatchState) -> Router {
    Router::new()
        .route("/{service}/{method}", post(dispatch))
        .fallback(unknown_route)
        .layer(build_http_layers())
        .with_state(state)
}

async fn dispatch(
    State(state): State<DispatchState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let operation = format!("/{service}/{method}");
    let Some(handler) = state.routes.get(&operation).cloned() else {
        return status_response(&Status::unimplemented(format!(
            "unknown operation {operation}"
        )));
    };

    let payload: Payload = if body.is_empty() {
        Payload::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(err) => {
                return status_response(&Status::invalid_argument(format!(
                    "decode request body: {err}"
                )))
            }
        }
    };

    // Hyper drops this future when the client goes away, which tears the
    // call down with it; the call context itself carries no extra signal.
    let (result, reply_header) = state
        .interceptor
        .intercept(
            &Context::background(),
            &operation,
            request_carrier(&headers),
            payload,
            handler,
        )
        .await;

    let mut response = match result {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(status) => status_response(&status),
    };
    flush_reply_header(&reply_header, response.headers_mut());
    response
}

async fn unknown_route() -> Response {
    status_response(&Status::unimplemented("unknown route"))
}

/// HTTP status for a call failure code.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        // Client closed request, as nginx reports it.
        Code::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Unknown | Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_response(status: &Status) -> Response {
    let mut response = (
        http_status(status.code),
        Json(json!({ "code": status.code, "message": status.message })),
    )
        .into_response();
    response.headers_mut().insert(
        HeaderName::from_static(CODE_HEADER),
        HeaderValue::from_static(status.code.as_str()),
    );
    response
}

fn request_carrier(headers: &HeaderMap) -> HeaderCarrier {
    let carrier = HeaderCarrier::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => carrier.add(name.as_str(), value),
            Err(_) => tracing::debug!(header = %name, "skipping non-ascii request header"),
        }
    }
    carrier
}

fn flush_reply_header(carrier: &HeaderCarrier, headers: &mut HeaderMap) {
    for (key, values) in carrier.snapshot() {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            tracing::warn!(header = %key, "dropping invalid reply header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => tracing::warn!(header = %key, "dropping invalid reply header value"),
            }
        }
    }
}
