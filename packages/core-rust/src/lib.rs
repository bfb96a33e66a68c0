//! `strato` core — call context, header carriers, middleware matching, and the
//! registry and logging contracts shared by every transport.

pub mod context;
pub mod handler;
pub mod log;
pub mod middleware;
pub mod registry;
pub mod selector;
pub mod status;
pub mod transport;

pub use context::{Context, ContextError};
pub use handler::{handler_fn, typed, CallResult, Handler, Payload};
pub use log::{Level, Logger};
pub use middleware::{Matcher, Middleware};
pub use registry::{Registrar, ServiceInstance};
pub use status::{Code, Status};
pub use transport::{CallContext, HeaderCarrier, Kind, Transport};
