//! Serializing queue for asynchronous device operations.
//!
//! The sensor link corrupts its own state when two requests overlap, so every
//! connect, write and disconnect goes through one [`OperationQueue`]. A single
//! worker task owns the FIFO and runs exactly one [`Operation`] at a time under
//! its timeout. Whichever comes first, completion or timeout, finishes the
//! operation and the worker moves on to the next one.
//!
//! `enqueue` may be called from any thread. There is no forced cancellation:
//! an operation that never completes is abandoned when its timeout fires.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use fishfinder::error::OperationError;
//! use fishfinder::queue::{Operation, OperationOutcome, OperationQueue};
//! use std::sync::Arc;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl Operation<String> for Ping {
//!     fn name(&self) -> &str {
//!         "ping"
//!     }
//!
//!     async fn execute(&self, target: &String) -> Result<(), OperationError> {
//!         assert_eq!(target, "sensor");
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let queue = OperationQueue::new(Arc::new("sensor".to_string()));
//! let done = queue.enqueue(Ping).unwrap();
//! assert_eq!(done.await, OperationOutcome::Succeeded);
//! # })
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{OperationError, QueueError};

/// Timeout applied when an operation does not choose its own.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// One unit of device I/O, run against a shared target `T`.
#[async_trait]
pub trait Operation<T: ?Sized>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// How long the queue waits before giving up on this operation.
    fn timeout(&self) -> Duration {
        DEFAULT_OPERATION_TIMEOUT
    }

    async fn execute(&self, target: &T) -> Result<(), OperationError>;
}

/// How a queued operation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// `execute` returned `Ok`.
    Succeeded,
    /// `execute` returned an error.
    Failed(String),
    /// The operation exceeded its timeout.
    TimedOut,
}

impl OperationOutcome {
    /// Whether the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded)
    }
}

/// Counters maintained by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations that succeeded.
    pub completed: u64,
    /// Operations that returned an error.
    pub failed: u64,
    /// Operations that hit their timeout.
    pub timed_out: u64,
}

/// Resolves to the [`OperationOutcome`] of one enqueued operation.
///
/// Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<OperationOutcome>,
}

impl Future for Completion {
    type Output = OperationOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                OperationOutcome::Failed("operation dropped before completion".to_string())
            })
        })
    }
}

struct Job<T: ?Sized> {
    op: Box<dyn Operation<T>>,
    done: oneshot::Sender<OperationOutcome>,
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    stats: Mutex<QueueStats>,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// FIFO serializer for [`Operation`]s against one target.
pub struct OperationQueue<T: ?Sized> {
    tx: Mutex<Option<mpsc::UnboundedSender<Job<T>>>>,
    shared: Arc<Shared>,
}

impl<T> OperationQueue<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn new(target: Arc<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        tokio::spawn(run_worker(target, rx, Arc::clone(&shared)));
        Self {
            tx: Mutex::new(Some(tx)),
            shared,
        }
    }

    /// Append `op`; it starts immediately if nothing else is in flight.
    pub fn enqueue<O>(&self, op: O) -> Result<Completion, QueueError>
    where
        O: Operation<T> + 'static,
    {
        self.enqueue_boxed(Box::new(op))
    }

    /// Enqueue an already boxed operation.
    pub fn enqueue_boxed(&self, op: Box<dyn Operation<T>>) -> Result<Completion, QueueError> {
        let (done, rx) = oneshot::channel();
        let guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = guard.as_ref().ok_or(QueueError::Closed)?;
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Job { op, done }).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(Completion { rx })
    }

    /// Operations queued or in flight.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Outcome counters so far.
    pub fn stats(&self) -> QueueStats {
        *self.shared.stats()
    }

    /// Stop accepting work. Operations already queued still run.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

async fn run_worker<T>(target: Arc<T>, mut rx: mpsc::UnboundedReceiver<Job<T>>, shared: Arc<Shared>)
where
    T: ?Sized + Send + Sync + 'static,
{
    while let Some(Job { op, done }) = rx.recv().await {
        let limit = op.timeout();
        debug!(op = op.name(), timeout = ?limit, "Starting operation");

        let outcome = match tokio::time::timeout(limit, op.execute(&target)).await {
            Ok(Ok(())) => OperationOutcome::Succeeded,
            Ok(Err(e)) => {
                warn!(op = op.name(), error = %e, "Operation failed");
                OperationOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(op = op.name(), timeout = ?limit, "Operation timed out");
                OperationOutcome::TimedOut
            }
        };

        {
            let mut stats = shared.stats();
            match outcome {
                OperationOutcome::Succeeded => stats.completed += 1,
                OperationOutcome::Failed(_) => stats.failed += 1,
                OperationOutcome::TimedOut => stats.timed_out += 1,
            }
        }
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        let _ = done.send(outcome);
    }
    debug!("Operation queue worker stopped");
}
