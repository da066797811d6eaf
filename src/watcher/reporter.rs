//! Error reporting for non-fatal watch errors.

use super::error::WatchError;

/// Receives every non-fatal error of a [`WatchService`](super::WatchService).
///
/// Called concurrently from the reconciliation loop, the dispatch loop and
/// any number of handler tasks. Implementations that keep shared state must
/// synchronize it themselves.
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, error: WatchError);
}

impl<F> ErrorReporter for F
where
    F: Fn(WatchError) + Send + Sync + 'static,
{
    fn report(&self, error: WatchError) {
        self(error)
    }
}

/// Default reporter: writes the error to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: WatchError) {
        tracing::error!("[watcher] {error}");
    }
}
