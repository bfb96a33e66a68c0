//! Structured-concurrency group for server tasks.
//!
//! Every task runs under one group context. The first task to fail with a
//! non-cancellation error has its error recorded and cancels the group, so
//! the other tasks wind down; later errors are logged and dropped.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use strato_core::Context;
use tokio::task::JoinSet;

use super::error::AppError;

pub(crate) struct Supervisor {
    ctx: Context,
    tasks: JoinSet<()>,
    first_error: Arc<Mutex<Option<AppError>>>,
}

impl Supervisor {
    pub(crate) fn new(ctx: Context) -> Self {
        Self {
            ctx,
            tasks: JoinSet::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let first_error = Arc::clone(&self.first_error);
        self.tasks.spawn(async move {
            if let Err(err) = task.await {
                record(&ctx, &first_error, err);
            }
        });
    }

    /// Waits for every task and returns the first recorded failure.
    pub(crate) async fn wait(mut self) -> Option<AppError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(join_err) = joined {
                let err = AppError::Server(anyhow::anyhow!("server task aborted: {join_err}"));
                record(&self.ctx, &self.first_error, err);
            }
        }
        self.first_error.lock().take()
    }
}

fn record(ctx: &Context, slot: &Mutex<Option<AppError>>, err: AppError) {
    if err.is_cancellation() {
        tracing::debug!("server task ended by cancellation");
        return;
    }
    let mut slot = slot.lock();
    if slot.is_none() {
        tracing::error!(error = %err, "server task failed; shutting down");
        *slot = Some(err);
        ctx.cancel();
    } else {
        tracing::warn!(error = %err, "additional server task failure");
    }
}
