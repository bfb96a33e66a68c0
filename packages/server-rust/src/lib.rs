//! `strato` server — application lifecycle orchestration and the transport
//! servers it drives.

pub mod app;
pub mod transport;

pub use app::{hook_fn, App, AppBuilder, AppError, AppInfo, LifecycleContext, Signal};
pub use transport::http::HttpServer;
pub use transport::{Readiness, Server};
