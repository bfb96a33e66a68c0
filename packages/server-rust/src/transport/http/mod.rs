//! JSON-over-HTTP RPC transport.
//!
//! Every operation `/{service}/{method}` is served as `POST /{service}/{method}`
//! with a JSON body. Request headers become the call's request carrier; the
//! reply carrier is written back as response headers on success and failure.
//! Failures answer with a JSON body `{"code": ..., "message": ...}`, the
//! matching HTTP status and an `x-strato-code` header.

mod dispatch;
mod layers;
mod server;

pub use dispatch::{http_status, CODE_HEADER};
pub use layers::build_http_layers;
pub use server::{HttpServer, HttpServerBuilder, HttpServerConfig};
