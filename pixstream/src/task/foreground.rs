//! Single-threaded foreground executor.
//!
//! Replaces the implicit "main thread" of a GUI toolkit with an explicit
//! handle: one dedicated thread draining a job queue in submission order.
//! Handles are cheap clones of the same queue; the thread exits when the
//! last handle is dropped.

use std::any::Any;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type ForegroundJob = Box<dyn FnOnce() + Send>;

/// Error returned when the foreground thread is no longer running.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("foreground executor has shut down")]
pub struct ForegroundClosed;

/// Handle to the foreground execution context.
#[derive(Clone)]
pub struct ForegroundExecutor {
    tx: mpsc::UnboundedSender<ForegroundJob>,
}

impl ForegroundExecutor {
    /// Start the foreground thread and return a handle to it.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ForegroundJob>();

        let builder = std::thread::Builder::new().name("pixstream-foreground".into());
        let spawned = builder.spawn(move || {
            debug!("foreground executor started");
            while let Some(job) = rx.blocking_recv() {
                // A panicking job must not take the executor down with it.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                if let Err(panic) = result {
                    warn!(
                        panic = panic_message(&panic),
                        "foreground job panicked"
                    );
                }
            }
            debug!("foreground executor stopped");
        });
        if let Err(err) = spawned {
            // Thread spawn failing at startup leaves nothing to run on;
            // surface it loudly rather than limping along.
            panic!("failed to spawn foreground thread: {err}");
        }

        Self { tx }
    }

    /// Enqueue a job without waiting for it.
    ///
    /// Returns `false` if the executor has shut down.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Run a job on the foreground thread and await its result.
    ///
    /// The future resolves only after the closure has returned, which is
    /// what lets a chain guarantee strict ordering across context
    /// switches.
    pub async fn run<R, F>(&self, job: F) -> Result<R, ForegroundClosed>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = done_tx.send(job());
            }))
            .map_err(|_| ForegroundClosed)?;

        // A panicked job drops the sender; report closure, not the panic.
        done_rx.await.map_err(|_| ForegroundClosed)
    }
}

impl std::fmt::Debug for ForegroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundExecutor")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
