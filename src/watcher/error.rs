//! Error types for the watch service.

use std::path::PathBuf;
use thiserror::Error;

use super::event::EventKind;
use super::service::ServiceState;

/// Boxed error produced by a handler job.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from watcher operations.
///
/// Only `InitFailed`, `ConfigError` and `InvalidState` are ever returned from
/// [`WatchService::run`](super::WatchService::run). Everything else is
/// delivered to the service's [`ErrorReporter`](super::ErrorReporter).
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot stat {path}: {source}")]
    StatFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Handler for {kind} on {path} failed: {source}")]
    HandlerFailed {
        kind: EventKind,
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    #[error("Watch service cannot run from state {state}")]
    InvalidState { state: ServiceState },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
