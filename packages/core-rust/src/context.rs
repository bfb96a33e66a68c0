//! Cancellation and deadline scopes.
//!
//! A [`Context`] is threaded explicitly through lifecycle hooks, registrar
//! calls, server start/stop and every inbound call. It pairs a
//! `CancellationToken` with an optional deadline; children observe their
//! parent's cancellation but never cancel the parent.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline. Cloning is cheap and clones
/// share the same token.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh root context: never cancelled unless `cancel()` is called, no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wraps an existing token, e.g. one owned by an embedding application.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derives a child that is cancelled with `self` but can be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child whose deadline is the earlier of the parent's and `now + timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        let own = now.checked_add(timeout);
        let deadline = match (self.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Merges two contexts into one that is done as soon as either is done.
    ///
    /// The merged context is a child of `a`; cancellation of `b` is forwarded
    /// by a watcher task that exits once the merged context is cancelled, so
    /// callers must cancel the result when they are finished with it.
    ///
    /// # Errors
    ///
    /// Returns the reason if either context is already done.
    pub fn merge(a: &Context, b: &Context) -> Result<Context, ContextError> {
        if let Some(err) = a.err().or_else(|| b.err()) {
            return Err(err);
        }

        let merged = a.token.child_token();
        let watched = b.token.clone();
        let forward = merged.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = watched.cancelled() => forward.cancel(),
                () = forward.cancelled() => {}
            }
        });

        let deadline = match (a.deadline, b.deadline) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        };
        Ok(Context {
            token: merged,
            deadline,
        })
    }

    /// The underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns why the context is done, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Waits until the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => ContextError::Canceled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Drives `fut` to completion unless the context finishes first, in which
    /// case `fut` is dropped.
    ///
    /// # Errors
    ///
    /// Returns the context's reason if it is done before `fut` completes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            err = self.done() => Err(err),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn child_observes_parent_cancel_but_not_reverse() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_done());

        let other = parent.child();
        parent.cancel();
        assert_eq!(other.err(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_keeps_earlier_deadline() {
        let outer = Context::background().with_timeout(Duration::from_millis(100));
        let inner = outer.with_timeout(Duration::from_secs(10));
        assert_eq!(inner.deadline(), outer.deadline());

        let tighter = outer.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < outer.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let res = ctx
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;
        assert_eq!(res, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_before_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(200));
        let res = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                7
            })
            .await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn run_on_cancelled_context_fails_immediately() {
        let ctx = Context::background();
        ctx.cancel();
        let res = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(res, Err(ContextError::Canceled));
    }

    #[tokio::test]
    async fn merge_fails_when_either_is_done() {
        let live = Context::background();
        let dead = Context::background();
        dead.cancel();
        assert_eq!(
            Context::merge(&live, &dead).unwrap_err(),
            ContextError::Canceled
        );
        assert_eq!(
            Context::merge(&dead, &live).unwrap_err(),
            ContextError::Canceled
        );
    }

    #[tokio::test]
    async fn merged_context_follows_both_parents() {
        let a = Context::background();
        let b = Context::background();

        let merged = Context::merge(&a, &b).unwrap();
        b.cancel();
        assert_eq!(merged.done().await, ContextError::Canceled);

        let c = Context::background();
        let d = Context::background();
        let merged = Context::merge(&c, &d).unwrap();
        c.cancel();
        assert!(merged.is_done());
        assert!(!d.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn merged_deadline_is_earliest() {
        let a = Context::background().with_timeout(Duration::from_secs(5));
        let b = Context::background().with_timeout(Duration::from_secs(1));
        let merged = Context::merge(&a, &b).unwrap();
        assert_eq!(merged.deadline(), b.deadline());
        merged.cancel();
    }
}
