//! OS watch backend abstraction and the `notify` implementation.
//!
//! The service only needs four things from the operating system: create a
//! watcher, add a path to it, a stream of raw events and a stream of errors.
//! [`WatchBackend`] creates a [`WatchPrimitive`] that pushes both streams into
//! an [`EventSink`]. Dropping the primitive releases the OS watcher.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::WatchError;
use super::event::{Op, RawEvent};

/// Sending half of the event and error streams handed to a backend.
#[derive(Debug, Clone)]
pub struct EventSink {
    events: mpsc::UnboundedSender<RawEvent>,
    errors: mpsc::UnboundedSender<WatchError>,
}

/// Receiving half, consumed by the dispatch loop.
#[derive(Debug)]
pub struct EventStreams {
    pub events: mpsc::UnboundedReceiver<RawEvent>,
    pub errors: mpsc::UnboundedReceiver<WatchError>,
}

impl EventSink {
    /// Create a connected sink and stream pair.
    pub fn channel() -> (EventSink, EventStreams) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        (
            EventSink {
                events: event_tx,
                errors: error_tx,
            },
            EventStreams {
                events: event_rx,
                errors: error_rx,
            },
        )
    }

    /// Push a raw event. Returns `false` once the service has stopped listening.
    pub fn send_event(&self, event: RawEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Push an asynchronous backend error.
    pub fn send_error(&self, error: WatchError) -> bool {
        self.errors.send(error).is_ok()
    }
}

/// A live OS-level watcher.
pub trait WatchPrimitive: Send + 'static {
    /// Start watching `path`. Must be idempotent for already watched paths.
    fn add(&mut self, path: &Path) -> Result<(), WatchError>;
}

/// Factory for [`WatchPrimitive`]s, called once per service run.
pub trait WatchBackend: Send + Sync + 'static {
    fn create(&self, sink: EventSink) -> Result<Box<dyn WatchPrimitive>, WatchError>;
}

/// Backend built on `notify::RecommendedWatcher`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
    fn create(&self, sink: EventSink) -> Result<Box<dyn WatchPrimitive>, WatchError> {
        let watched: Arc<Mutex<HashSet<PathBuf>>> = Arc::default();
        let forget = watched.clone();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in convert_event(event) {
                    // The OS drops a file watch once the file is removed or
                    // moved away; let reconciliation re-add it.
                    if raw.op.intersects(Op::REMOVE | Op::RENAME) {
                        forget.lock().remove(&raw.path);
                    }
                    sink.send_event(raw);
                }
            }
            Err(e) => {
                sink.send_error(WatchError::EventError {
                    details: e.to_string(),
                });
            }
        })?;

        Ok(Box::new(NotifyPrimitive { watcher, watched }))
    }
}

struct NotifyPrimitive {
    watcher: notify::RecommendedWatcher,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
}

impl WatchPrimitive for NotifyPrimitive {
    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.watched.lock().contains(path) {
            return Ok(());
        }

        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("watcher", "watching", "{}", path.display());
        self.watched.lock().insert(path.to_path_buf());
        Ok(())
    }
}

impl Drop for NotifyPrimitive {
    fn drop(&mut self) {
        crate::debug_event!(
            "watcher",
            "released",
            "{} paths",
            self.watched.lock().len()
        );
    }
}

/// Map a `notify` event kind onto the operation bits it represents.
fn op_for_kind(kind: &notify::EventKind) -> Op {
    use notify::EventKind as Kind;

    match kind {
        Kind::Create(_) => Op::CREATE,
        Kind::Modify(ModifyKind::Name(RenameMode::To)) => Op::CREATE,
        Kind::Modify(ModifyKind::Name(_)) => Op::RENAME,
        Kind::Modify(ModifyKind::Metadata(_)) => Op::CHMOD,
        Kind::Modify(_) => Op::WRITE,
        Kind::Remove(_) => Op::REMOVE,
        Kind::Access(_) | Kind::Any | Kind::Other => Op::empty(),
    }
}

/// Split a `notify` event into one raw event per path.
///
/// A `Name(Both)` rename carries `[from, to]`: the old name is renamed away,
/// the new name is created.
fn convert_event(event: Event) -> Vec<RawEvent> {
    let op = op_for_kind(&event.kind);
    if op.is_empty() {
        return Vec::new();
    }

    if matches!(
        event.kind,
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    ) {
        let mut paths = event.paths.into_iter();
        let mut raw = Vec::with_capacity(2);
        if let Some(from) = paths.next() {
            raw.push(RawEvent::new(from, Op::RENAME));
        }
        if let Some(to) = paths.next() {
            raw.push(RawEvent::new(to, Op::CREATE));
        }
        return raw;
    }

    event
        .paths
        .into_iter()
        .map(|path| RawEvent::new(path, op))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: notify::EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_convert_basic_kinds() {
        let cases = [
            (notify::EventKind::Create(CreateKind::File), Op::CREATE),
            (
                notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                Op::WRITE,
            ),
            (notify::EventKind::Modify(ModifyKind::Any), Op::WRITE),
            (
                notify::EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                Op::CHMOD,
            ),
            (
                notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                Op::RENAME,
            ),
            (notify::EventKind::Remove(RemoveKind::File), Op::REMOVE),
        ];

        for (kind, expected) in cases {
            let label = format!("{kind:?}");
            let raw = convert_event(event(kind, &["/tmp/a.txt"]));
            assert_eq!(raw, vec![RawEvent::new("/tmp/a.txt", expected)], "{label}");
        }
    }

    #[test]
    fn test_convert_drops_access_events() {
        let kind = notify::EventKind::Access(notify::event::AccessKind::Any);
        assert!(convert_event(event(kind, &["/tmp/a.txt"])).is_empty());
        assert!(convert_event(event(notify::EventKind::Any, &["/tmp/a.txt"])).is_empty());
    }

    #[test]
    fn test_convert_rename_both() {
        let kind = notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        let raw = convert_event(event(kind, &["/tmp/old.txt", "/tmp/new.txt"]));

        assert_eq!(
            raw,
            vec![
                RawEvent::new("/tmp/old.txt", Op::RENAME),
                RawEvent::new("/tmp/new.txt", Op::CREATE),
            ]
        );
    }

    #[test]
    fn test_convert_multiple_paths() {
        let kind = notify::EventKind::Remove(RemoveKind::Any);
        let raw = convert_event(event(kind, &["/tmp/a.txt", "/tmp/b.txt"]));
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().all(|r| r.op == Op::REMOVE));
    }

    #[test]
    fn test_sink_reports_closed_streams() {
        let (sink, streams) = EventSink::channel();
        assert!(sink.send_event(RawEvent::new("/tmp/a.txt", Op::WRITE)));
        drop(streams);
        assert!(!sink.send_event(RawEvent::new("/tmp/a.txt", Op::WRITE)));
    }
}
