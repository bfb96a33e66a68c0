//! Application orchestration.
//!
//! An [`App`] owns a set of transport servers and drives them through one
//! lifecycle: ordered hooks, concurrent start, registration once every
//! server is ready, and a single graceful shutdown triggered by a signal,
//! an explicit [`App::stop`], base-context cancellation or the first
//! server failure.

pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod signal;
mod supervisor;

pub use config::{hook_fn, AppBuilder, AppConfig, Hook};
pub use context::{AppInfo, LifecycleContext};
pub use error::{AppError, HookPhase};
pub use lifecycle::{App, Phase};
pub use signal::{signal_channel, ChannelSignals, OsSignals, Signal, SignalSource};
