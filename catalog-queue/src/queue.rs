//! Rate-limited FIFO queue with a single drain worker.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use catalog_core::error::{FetchError, Result};
use catalog_core::types::QueueConfig;

use crate::window::RateWindow;

/// A deferred unit of work. Consumed exactly once by the drain worker.
struct QueueTask {
    perform: Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>,
    respond: oneshot::Sender<Result<Value>>,
}

/// FIFO request queue paced to a requests-per-second ceiling.
///
/// Tasks run one at a time, in submission order, on a dedicated worker task
/// that owns the rate window. A task's failure (or panic) is forwarded to that
/// task's caller only; the worker moves on to the next task.
///
/// Dropping the queue lets the worker finish what is already queued and exit.
pub struct RateLimitedQueue {
    sender: mpsc::UnboundedSender<QueueTask>,
    pending: Arc<AtomicUsize>,
    config: QueueConfig,
}

impl RateLimitedQueue {
    /// Creates a queue and spawns its drain worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let window = RateWindow::new(config.ceiling_per_second, config.window_buffer());

        tokio::spawn(drain(receiver, window, pending.clone()));
        debug!(ceiling = config.ceiling_per_second, "Request queue started");

        Ok(Self {
            sender,
            pending,
            config,
        })
    }

    /// Submits a task and returns a future for its outcome.
    ///
    /// The task is queued immediately, so submission order is call order even
    /// if the returned futures are awaited in a different order. The outcome
    /// is exactly the task's own result.
    pub fn enqueue<F, Fut>(&self, task: F) -> impl Future<Output = Result<Value>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let (respond, outcome) = oneshot::channel();
        let task = QueueTask {
            perform: Box::new(move || task().boxed()),
            respond,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = self.sender.send(task).is_ok();
        if !queued {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            if !queued {
                return Err(FetchError::QueueClosed);
            }
            outcome.await.unwrap_or(Err(FetchError::QueueClosed))
        }
    }

    /// Number of tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

async fn drain(
    mut receiver: mpsc::UnboundedReceiver<QueueTask>,
    mut window: RateWindow,
    pending: Arc<AtomicUsize>,
) {
    while let Some(task) = receiver.recv().await {
        window.admit().await;

        let result = match AssertUnwindSafe((task.perform)()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!("Queued task panicked");
                Err(FetchError::Internal("queued task panicked".into()))
            }
        };

        pending.fetch_sub(1, Ordering::SeqCst);
        if task.respond.send(result).is_err() {
            debug!("Caller went away before its task finished");
        }
    }

    debug!("Request queue closed");
}
