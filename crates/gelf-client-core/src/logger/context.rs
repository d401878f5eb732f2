//! Task-scoped logger binding.
//!
//! A logger can be bound to a scope of execution so that code deep inside
//! it reaches the right emitter without threading a handle through every
//! signature. The binding rides tokio's task-local storage: it follows the
//! task across await points, nests (the innermost binding wins), and never
//! leaks into sibling tasks.

use std::future::Future;

use super::core::Logger;

tokio::task_local! {
    static ACTIVE_LOGGER: Logger;
}

impl Logger {
    /// Returns the logger bound to the current scope, if any.
    #[must_use]
    pub fn current() -> Option<Logger> {
        ACTIVE_LOGGER.try_with(Logger::clone).ok()
    }

    /// Runs `fut` with this logger bound as the current one.
    ///
    /// The binding holds across await points inside `fut`, shadows any
    /// outer binding for its duration, and is restored when `fut`
    /// completes. Tasks spawned from inside the scope do not inherit the
    /// binding; pass them a clone or re-scope explicitly.
    pub async fn scope<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_LOGGER.scope(self.clone(), fut).await
    }

    /// Synchronous variant of [`Logger::scope`] for plain closures.
    pub fn scope_sync<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ACTIVE_LOGGER.sync_scope(self.clone(), f)
    }
}
