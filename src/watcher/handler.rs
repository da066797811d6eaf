//! Handler traits for the watch service.
//!
//! A handler runs in two stages. [`Handler::prepare`] is called synchronously
//! on the dispatch loop with the raw event and builds a [`Job`]. The job is
//! then spawned as an independent task and executed with the service's
//! cancellation token.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::event::RawEvent;

/// Result of a handler job. Errors are routed to the service's reporter.
pub type HandlerResult = anyhow::Result<()>;

/// Deferred work produced by a [`Handler`].
///
/// Cancellation is advisory: a job that wants to stop early on shutdown must
/// watch the token itself.
#[async_trait]
pub trait Job: Send + 'static {
    async fn execute(self: Box<Self>, cancel: CancellationToken) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Job for F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn execute(self: Box<Self>, cancel: CancellationToken) -> HandlerResult {
        (*self)(cancel).await
    }
}

/// Maps a raw event to a unit of deferred work.
///
/// Must not block: it runs inline on the dispatch loop.
pub trait Handler: Send + Sync + 'static {
    fn prepare(&self, event: &RawEvent) -> Box<dyn Job>;
}

impl<F, J> Handler for F
where
    F: Fn(&RawEvent) -> J + Send + Sync + 'static,
    J: Job,
{
    fn prepare(&self, event: &RawEvent) -> Box<dyn Job> {
        Box::new(self(event))
    }
}

/// Build a [`Handler`] from a closure, letting the compiler infer the
/// event parameter type.
///
/// ```no_run
/// use tripwire::watcher::{handler_fn, job};
///
/// let handler = handler_fn(|event| {
///     let path = event.path.clone();
///     job(move |_cancel| async move {
///         println!("{} changed", path.display());
///         Ok(())
///     })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, J>(f: F) -> F
where
    F: Fn(&RawEvent) -> J + Send + Sync + 'static,
    J: Job,
{
    f
}

/// Build a [`Job`] from a closure over the cancellation token.
pub fn job<F, Fut>(f: F) -> F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::event::Op;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        prepared: Arc<AtomicUsize>,
    }

    struct CountingJob;

    #[async_trait]
    impl Job for CountingJob {
        async fn execute(self: Box<Self>, _cancel: CancellationToken) -> HandlerResult {
            Ok(())
        }
    }

    impl Handler for Counting {
        fn prepare(&self, _event: &RawEvent) -> Box<dyn Job> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingJob)
        }
    }

    #[tokio::test]
    async fn test_struct_handler() {
        let prepared = Arc::new(AtomicUsize::new(0));
        let handler = Counting {
            prepared: prepared.clone(),
        };

        let job = handler.prepare(&RawEvent::new("/tmp/a.txt", Op::WRITE));
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
        job.execute(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_closure_handler_captures_event() {
        let handler = handler_fn(|event| {
            let path = event.path.clone();
            job(move |_cancel| async move {
                anyhow::ensure!(path.ends_with("a.txt"), "unexpected path");
                Ok(())
            })
        });

        let ok = handler.prepare(&RawEvent::new("/tmp/a.txt", Op::WRITE));
        assert!(ok.execute(CancellationToken::new()).await.is_ok());

        let err = handler.prepare(&RawEvent::new("/tmp/b.txt", Op::WRITE));
        assert!(err.execute(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_job_observes_cancellation() {
        let handler = handler_fn(|_event| {
            job(|cancel: CancellationToken| async move {
                cancel.cancelled().await;
                let result: HandlerResult = Err(anyhow::anyhow!("cancelled"));
                result
            })
        });

        let token = CancellationToken::new();
        token.cancel();
        let result = handler
            .prepare(&RawEvent::new("/tmp/a.txt", Op::CREATE))
            .execute(token)
            .await;
        assert!(result.is_err());
    }
}
