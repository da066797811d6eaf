//! # tripwire
//!
//! Register handlers per file and per event kind; tripwire watches the files
//! at the OS level, keeps re-establishing watches for files that do not exist
//! yet or whose watch was dropped, and runs matching handlers as independent
//! async tasks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripwire::Settings;
//! use tripwire::watcher::{EventKind, HandlerRegistry, WatchService, handler_fn, job};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! settings.init_logging();
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.set_handler(
//!     EventKind::Write,
//!     handler_fn(|event| {
//!         let path = event.path.clone();
//!         job(move |_cancel| async move {
//!             tracing::info!("{} was written", path.display());
//!             Ok(())
//!         })
//!     }),
//! );
//!
//! let service = Arc::new(WatchService::from_config(&settings.watch));
//! service.add("/tmp/a.txt", registry);
//!
//! let runner = service.clone();
//! let handle = tokio::spawn(async move { runner.run().await });
//!
//! // ... later
//! service.close();
//! handle.await.expect("watch service panicked")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    ErrorReporter, EventKind, HandlerRegistry, RawEvent, WatchError, WatchService,
};
