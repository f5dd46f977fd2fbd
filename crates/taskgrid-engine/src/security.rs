//! Identity of the job currently executing.
//!
//! The submitter's [`SecurityContext`] is installed as a tokio task-local for
//! the duration of a task body. Code running outside such a scope sees no
//! identity at all, so a worker thread can never inherit a previous job's
//! submitter.

use std::future::Future;

use taskgrid_core::SecurityContext;

tokio::task_local! {
    static CURRENT: SecurityContext;
}

/// Identity installed for the running task, if any.
pub fn current() -> Option<SecurityContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Run `fut` with `ctx` as the current identity.
pub async fn scope<F>(ctx: SecurityContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, fut).await
}
