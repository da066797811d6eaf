//! Per-file, per-event handler dispatch on top of OS file watching.
//!
//! # Architecture
//!
//! ```text
//! WatchService
//!   - path -> HandlerRegistry map (RwLock)
//!   - Reconciliation loop: stat + WatchPrimitive::add every interval
//!   - Dispatch loop: RawEvent -> EventKind -> Handler -> spawned Job
//!         |
//!    WatchBackend (NotifyBackend by default)
//!         |
//!    EventSink -> events / errors -> dispatch loop
//! ```
//!
//! Non-fatal errors from either loop and from handler jobs all go to one
//! [`ErrorReporter`].

mod backend;
mod error;
mod event;
mod handler;
mod handler_registry;
mod reporter;
mod service;

pub use backend::{EventSink, EventStreams, NotifyBackend, WatchBackend, WatchPrimitive};
pub use error::{BoxError, WatchError};
pub use event::{EventKind, Op, RawEvent};
pub use handler::{Handler, HandlerResult, Job, handler_fn, job};
pub use handler_registry::HandlerRegistry;
pub use reporter::{ErrorReporter, LogReporter};
pub use service::{DEFAULT_INTERVAL, ServiceState, WatchService};
