//! Watch service that routes file events to per-path handler registries.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;

use crate::config::WatchConfig;

use super::backend::{EventSink, EventStreams, NotifyBackend, WatchBackend, WatchPrimitive};
use super::error::WatchError;
use super::event::RawEvent;
use super::handler_registry::HandlerRegistry;
use super::reporter::{ErrorReporter, LogReporter};

/// Default reconciliation interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

type TargetMap = Arc<RwLock<HashMap<PathBuf, Arc<HandlerRegistry>>>>;

/// Lifecycle of a [`WatchService`].
///
/// `Created -> Running -> Draining -> Stopped`, or `Created -> Failed` when
/// the backend cannot be started. A service never leaves `Stopped` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Draining,
    Stopped,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Created => "created",
            ServiceState::Running => "running",
            ServiceState::Draining => "draining",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Watches registered files and dispatches their events to handlers.
///
/// Two loops run while the service is up:
/// 1. Reconciliation: every interval, asks the backend to watch each
///    registered path that currently exists
/// 2. Dispatch: classifies raw events, looks up the handler for the path and
///    kind, and spawns its job as an independent task
///
/// Configure with the `set_*` methods, then share the service (e.g. in an
/// `Arc`) and call [`run`](Self::run). [`close`](Self::close) may be called
/// any number of times, before or during the run.
pub struct WatchService {
    targets: TargetMap,
    interval: Duration,
    drain_timeout: Option<Duration>,
    reporter: Arc<dyn ErrorReporter>,
    backend: Box<dyn WatchBackend>,
    shutdown: CancellationToken,
    handler_tasks: TaskTracker,
    state: Mutex<ServiceState>,
}

impl WatchService {
    /// Create a service on the OS `notify` backend with default settings.
    pub fn new() -> Self {
        Self::with_backend(NotifyBackend)
    }

    /// Create a service on a custom watch backend.
    pub fn with_backend(backend: impl WatchBackend) -> Self {
        Self {
            targets: Arc::default(),
            interval: DEFAULT_INTERVAL,
            drain_timeout: None,
            reporter: Arc::new(LogReporter),
            backend: Box::new(backend),
            shutdown: CancellationToken::new(),
            handler_tasks: TaskTracker::new(),
            state: Mutex::new(ServiceState::Created),
        }
    }

    /// Create a service on the `notify` backend using loaded settings.
    pub fn from_config(config: &WatchConfig) -> Self {
        let mut service = Self::new();
        service.set_duration(config.interval());
        service.set_drain_timeout(config.drain_timeout());
        service
    }

    /// Replace the error reporter. Defaults to [`LogReporter`].
    pub fn set_error_handler(&mut self, reporter: impl ErrorReporter) {
        self.reporter = Arc::new(reporter);
    }

    /// Set the reconciliation interval.
    pub fn set_duration(&mut self, duration: Duration) {
        self.interval = duration;
    }

    /// Wait up to `timeout` for in-flight handler jobs when stopping.
    ///
    /// `None` (the default) returns as soon as both loops have exited.
    pub fn set_drain_timeout(&mut self, timeout: Option<Duration>) {
        self.drain_timeout = timeout;
    }

    pub fn duration(&self) -> Duration {
        self.interval
    }

    /// Attach `registry` to `path`, replacing any previous registry.
    ///
    /// The path does not need to exist yet; it is watched once it appears.
    /// Events are matched against the path exactly as given here.
    pub fn add(&self, path: impl Into<PathBuf>, registry: Arc<HandlerRegistry>) {
        let path = path.into();
        crate::debug_event!("watcher", "registered", "{}", path.display());
        self.targets.write().insert(path, registry);
    }

    /// All registered paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.targets.read().keys().cloned().collect()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Number of handler jobs still running.
    pub fn in_flight(&self) -> usize {
        self.handler_tasks.len()
    }

    /// Request shutdown. Idempotent; calling it before `run` makes the run
    /// stop right after starting.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Run until [`close`](Self::close) is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run(&self) -> Result<(), WatchError> {
        self.run_with_token(&CancellationToken::new()).await
    }

    /// Run until [`close`](Self::close) is called or `parent` is cancelled.
    ///
    /// Handler jobs receive a child of `parent`, cancelled when the service
    /// stops. Returns an error only if the service could not start.
    pub async fn run_with_token(&self, parent: &CancellationToken) -> Result<(), WatchError> {
        let (primitive, streams) = self.start()?;
        let token = parent.child_token();
        // Dropping this future must still stop both loops and release the
        // primitive.
        let _guard = RunGuard {
            state: &self.state,
            _cancel: token.clone().drop_guard(),
        };

        crate::log_event!(
            "watcher",
            "started",
            "{} paths, reconciling every {:?}",
            self.targets.read().len(),
            self.interval
        );

        let reconcile: JoinHandle<()> = tokio::spawn(reconcile_loop(
            primitive,
            self.targets.clone(),
            self.reporter.clone(),
            self.interval,
            token.clone(),
        ));

        let dispatcher = Dispatcher {
            targets: self.targets.clone(),
            reporter: self.reporter.clone(),
            tasks: self.handler_tasks.clone(),
            token: token.clone(),
        };
        let dispatch: JoinHandle<()> = tokio::spawn(dispatcher.run(streams));

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                crate::debug_event!("watcher", "close requested");
            }
            _ = token.cancelled() => {
                crate::debug_event!("watcher", "parent cancelled");
            }
        }

        *self.state.lock() = ServiceState::Draining;
        token.cancel();

        if let Err(e) = reconcile.await {
            self.reporter.report(WatchError::EventError {
                details: format!("reconciliation loop failed: {e}"),
            });
        }
        if let Err(e) = dispatch.await {
            self.reporter.report(WatchError::EventError {
                details: format!("dispatch loop failed: {e}"),
            });
        }

        self.handler_tasks.close();
        if let Some(timeout) = self.drain_timeout {
            if tokio::time::timeout(timeout, self.handler_tasks.wait())
                .await
                .is_err()
            {
                tracing::warn!(
                    "[watcher] {} handler jobs still running after {timeout:?}",
                    self.handler_tasks.len()
                );
            }
        }

        *self.state.lock() = ServiceState::Stopped;
        crate::log_event!("watcher", "stopped");
        Ok(())
    }

    /// Move `Created -> Running` and create the backend primitive.
    fn start(&self) -> Result<(Box<dyn WatchPrimitive>, EventStreams), WatchError> {
        let mut state = self.state.lock();
        if *state != ServiceState::Created {
            return Err(WatchError::InvalidState { state: *state });
        }

        if self.interval.is_zero() {
            *state = ServiceState::Failed;
            return Err(WatchError::ConfigError {
                reason: "reconciliation interval must be greater than zero".to_string(),
            });
        }

        let (sink, streams) = EventSink::channel();
        match self.backend.create(sink) {
            Ok(primitive) => {
                *state = ServiceState::Running;
                Ok((primitive, streams))
            }
            Err(e) => {
                *state = ServiceState::Failed;
                Err(e)
            }
        }
    }
}

/// Cancels the run token and marks the service stopped when `run` returns
/// or its future is dropped.
struct RunGuard<'a> {
    state: &'a Mutex<ServiceState>,
    _cancel: DropGuard,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = ServiceState::Stopped;
    }
}

impl Default for WatchService {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically watch every registered path that exists.
///
/// Owns the primitive: it is released when this loop exits.
async fn reconcile_loop(
    mut primitive: Box<dyn WatchPrimitive>,
    targets: TargetMap,
    reporter: Arc<dyn ErrorReporter>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                reconcile(primitive.as_mut(), &targets, reporter.as_ref()).await;
            }
        }
    }

    crate::debug_event!("reconcile", "stopped");
}

/// One reconciliation pass. Failures are reported per path and never stop
/// the pass.
async fn reconcile(
    primitive: &mut dyn WatchPrimitive,
    targets: &TargetMap,
    reporter: &dyn ErrorReporter,
) {
    let paths: Vec<PathBuf> = targets.read().keys().cloned().collect();

    for path in paths {
        match tokio::fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!("[reconcile] waiting for {}", path.display());
                continue;
            }
            Err(source) => {
                reporter.report(WatchError::StatFailed { path, source });
                continue;
            }
        }

        if let Err(e) = primitive.add(&path) {
            reporter.report(e);
        }
    }
}

/// State shared by the dispatch loop and the handler jobs it spawns.
struct Dispatcher {
    targets: TargetMap,
    reporter: Arc<dyn ErrorReporter>,
    tasks: TaskTracker,
    token: CancellationToken,
}

impl Dispatcher {
    async fn run(self, mut streams: EventStreams) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                Some(event) = streams.events.recv() => self.dispatch(event),
                Some(error) = streams.errors.recv() => self.reporter.report(error),
            }
        }

        crate::debug_event!("dispatch", "stopped");
    }

    /// Route one raw event. Never waits for the handler job.
    fn dispatch(&self, event: RawEvent) {
        let Some(registry) = self.targets.read().get(&event.path).cloned() else {
            tracing::trace!("[dispatch] unmatched {:?} {}", event.op, event.path.display());
            return;
        };

        let Some(kind) = event.kind() else {
            return;
        };

        let Some(handler) = registry.get_handler(kind) else {
            crate::debug_event!("dispatch", "no handler", "{kind} {}", event.path.display());
            return;
        };

        crate::debug_event!("dispatch", kind, "{}", event.path.display());

        let job = match catch_unwind(AssertUnwindSafe(|| handler.prepare(&event))) {
            Ok(job) => job,
            Err(_) => {
                self.reporter.report(WatchError::HandlerFailed {
                    kind,
                    path: event.path,
                    source: "handler panicked while preparing its job".into(),
                });
                return;
            }
        };

        let reporter = self.reporter.clone();
        let token = self.token.clone();
        let path = event.path;
        self.tasks.spawn(async move {
            if let Err(e) = job.execute(token).await {
                reporter.report(WatchError::HandlerFailed {
                    kind,
                    path,
                    source: e.into(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBackend;

    impl WatchBackend for FailingBackend {
        fn create(&self, _sink: EventSink) -> Result<Box<dyn WatchPrimitive>, WatchError> {
            Err(WatchError::InitFailed {
                reason: "no inotify instances left".to_string(),
            })
        }
    }

    struct NullPrimitive;

    impl WatchPrimitive for NullPrimitive {
        fn add(&mut self, _path: &std::path::Path) -> Result<(), WatchError> {
            Ok(())
        }
    }

    struct NullBackend;

    impl WatchBackend for NullBackend {
        fn create(&self, _sink: EventSink) -> Result<Box<dyn WatchPrimitive>, WatchError> {
            Ok(Box::new(NullPrimitive))
        }
    }

    #[test]
    fn test_defaults() {
        let service = WatchService::with_backend(NullBackend);
        assert_eq!(service.duration(), DEFAULT_INTERVAL);
        assert_eq!(service.state(), ServiceState::Created);
        assert!(service.paths().is_empty());
        assert_eq!(service.in_flight(), 0);
    }

    #[test]
    fn test_add_overwrites_same_path() {
        let service = WatchService::with_backend(NullBackend);
        service.add("/tmp/a.txt", Arc::new(HandlerRegistry::new()));
        service.add("/tmp/a.txt", Arc::new(HandlerRegistry::new()));
        service.add("/tmp/b.txt", Arc::new(HandlerRegistry::new()));
        assert_eq!(service.paths().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal() {
        let service = WatchService::with_backend(FailingBackend);
        let err = service.run().await.unwrap_err();

        assert!(matches!(err, WatchError::InitFailed { .. }));
        assert_eq!(service.state(), ServiceState::Failed);

        // Failed is terminal.
        let err = service.run().await.unwrap_err();
        assert!(matches!(
            err,
            WatchError::InvalidState {
                state: ServiceState::Failed
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let mut service = WatchService::with_backend(NullBackend);
        service.set_duration(Duration::ZERO);

        let err = service.run().await.unwrap_err();
        assert!(matches!(err, WatchError::ConfigError { .. }));
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_close_before_run_stops_immediately() {
        let service = WatchService::with_backend(NullBackend);
        service.close();
        service.close();

        tokio::time::timeout(Duration::from_secs(5), service.run())
            .await
            .expect("run should return after close")
            .unwrap();

        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_not_restartable() {
        let service = WatchService::with_backend(NullBackend);
        service.close();
        service.run().await.unwrap();

        let err = service.run().await.unwrap_err();
        assert!(matches!(
            err,
            WatchError::InvalidState {
                state: ServiceState::Stopped
            }
        ));
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_run() {
        let service = WatchService::with_backend(NullBackend);
        let parent = CancellationToken::new();
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(5), service.run_with_token(&parent))
            .await
            .expect("run should return after parent cancellation")
            .unwrap();

        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
