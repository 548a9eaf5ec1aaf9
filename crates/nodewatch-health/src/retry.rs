//! Delayed single re-probes on a bounded worker pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use nodewatch_core::NodeDescriptor;

/// Work run once when a retry comes due.
pub type RetryAction = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 50;

struct RetryJob {
    address: String,
    due: Instant,
    action: RetryAction,
}

/// Runs each scheduled action once, after its delay, on one of a fixed
/// number of workers.
///
/// Jobs are taken in submission order. With a uniform delay that is also
/// due order, so a worker simply sleeps until its job is due.
pub struct RetryScheduler {
    tx: StdMutex<Option<mpsc::UnboundedSender<RetryJob>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    drain_tx: watch::Sender<bool>,
    pending: Arc<AtomicUsize>,
}

impl RetryScheduler {
    /// Spawn `workers` workers (at least one) on the current runtime.
    pub fn start(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<RetryJob>();
        let rx = Arc::new(Mutex::new(rx));
        let (drain_tx, drain_rx) = watch::channel(false);
        let pending = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    drain_rx.clone(),
                    Arc::clone(&pending),
                ))
            })
            .collect();

        Self {
            tx: StdMutex::new(Some(tx)),
            workers: StdMutex::new(handles),
            drain_tx,
            pending,
        }
    }

    /// Run `action` once after `delay`. Returns `false` when the scheduler
    /// is shutting down and the retry was dropped.
    pub fn schedule_retry(&self, node: &NodeDescriptor, delay: Duration, action: RetryAction) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            debug!(address = %node.address, "scheduler stopped, retry dropped");
            return false;
        };

        let job = RetryJob {
            address: node.address.clone(),
            due: Instant::now() + delay,
            action,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            debug!(address = %node.address, "retry workers gone, retry dropped");
            return false;
        }
        debug!(address = %node.address, delay = ?delay, "retry scheduled");
        true
    }

    /// Retries accepted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting retries, run every queued one without waiting for
    /// its delay, and wait for the workers to finish.
    pub async fn shutdown(&self) {
        let sender = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        let _ = self.drain_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        debug!(pending = self.pending(), "draining retries");
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<RetryJob>>>,
    mut drain: watch::Receiver<bool>,
    pending: Arc<AtomicUsize>,
) {
    loop {
        // Only one idle worker waits on the queue at a time.
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        if !*drain.borrow() {
            tokio::select! {
                _ = tokio::time::sleep_until(job.due) => {}
                _ = drain.wait_for(|draining| *draining) => {}
            }
        }

        // Own task so a panicking action cannot take the worker down.
        if let Err(e) = tokio::spawn(job.action).await {
            warn!(worker = id, address = %job.address, error = %e, "retry action failed");
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}
