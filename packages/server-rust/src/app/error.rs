//! Orchestrator error type.

use std::fmt;

use strato_core::ContextError;

/// Lifecycle phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl HookPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeStart => "before-start",
            Self::AfterStart => "after-start",
            Self::BeforeStop => "before-stop",
            Self::AfterStop => "after-stop",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything `App::run` and `App::stop` can fail with.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Invalid options, caught at build time or when `run` is misused.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{phase} hook failed: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("register failed: {0}")]
    Registration(#[source] anyhow::Error),

    #[error("deregister failed: {0}")]
    Deregistration(#[source] anyhow::Error),

    #[error("server error: {0}")]
    Server(#[source] anyhow::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl AppError {
    /// Wraps a server failure, keeping plain cancellation recognisable.
    #[must_use]
    pub fn server(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ContextError>() {
            Some(ContextError::Canceled) => Self::Context(ContextError::Canceled),
            _ => Self::Server(err),
        }
    }

    /// Plain cancellation is the normal way for the lifecycle to end and is
    /// never reported as a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(ContextError::Canceled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_server_error_is_cancellation() {
        let err = AppError::server(anyhow::Error::from(ContextError::Canceled));
        assert!(err.is_cancellation());

        let err = AppError::server(anyhow::Error::from(ContextError::DeadlineExceeded));
        assert!(!err.is_cancellation());
        assert!(matches!(err, AppError::Server(_)));
    }

    #[test]
    fn hook_error_names_its_phase() {
        let err = AppError::Hook {
            phase: HookPhase::BeforeStop,
            source: anyhow::anyhow!("flush failed"),
        };
        assert_eq!(err.to_string(), "before-stop hook failed: flush failed");
    }
}
