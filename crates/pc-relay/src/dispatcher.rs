//! Background dispatcher
//!
//! Decouples plan purchases from event delivery. `submit` only enqueues and
//! returns immediately; a fixed pool of worker tasks drains the queue and
//! calls the publisher. When the queue is full the new submission is dropped
//! with a warning rather than blocking the purchase.

use futures::FutureExt;
use pc_common::SubscriberSnapshot;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::broadcaster::{EventPublisher, PublishOutcome, SUBSCRIBER_CREATED};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Pending submissions held before new ones are dropped
    pub queue_capacity: usize,
    /// Event name passed to the publisher
    pub event_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            event_name: SUBSCRIBER_CREATED.to_string(),
        }
    }
}

/// Result of a submission. Rejections are already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    QueueFull,
    ShutDown,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Submission {
    snapshot: SubscriberSnapshot,
    submitted_at: Instant,
}

struct DispatcherInner {
    sender: mpsc::Sender<Submission>,
    counters: Arc<Counters>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

/// Cloneable handle to the worker pool
#[derive(Clone)]
pub struct AsyncDispatcher {
    inner: Arc<DispatcherInner>,
}

impl AsyncDispatcher {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    pub fn start(config: DispatcherConfig, publisher: Arc<dyn EventPublisher>) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let (shutdown_tx, _) = broadcast::channel(1);
        let event_name: Arc<str> = Arc::from(config.event_name.as_str());

        for worker_id in 0..workers {
            tokio::spawn(run_worker(
                worker_id,
                receiver.clone(),
                publisher.clone(),
                counters.clone(),
                event_name.clone(),
                shutdown_tx.subscribe(),
            ));
        }

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            event = %config.event_name,
            "Event dispatcher started"
        );

        Self {
            inner: Arc::new(DispatcherInner {
                sender,
                counters,
                shutdown_tx,
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Enqueue a snapshot for publishing. Never blocks and never fails the caller.
    pub fn submit(&self, snapshot: SubscriberSnapshot) -> SubmitOutcome {
        let subscriber_id = snapshot.id;

        if !self.inner.running.load(Ordering::SeqCst) {
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(subscriber_id, "Dispatcher is shut down; dropping event");
            return SubmitOutcome::ShutDown;
        }

        let submission = Submission {
            snapshot,
            submitted_at: Instant::now(),
        };

        match self.inner.sender.try_send(submission) {
            Ok(()) => {
                self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(subscriber_id, "Event queued for dispatch");
                SubmitOutcome::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subscriber_id, "Dispatch queue full; dropping event");
                SubmitOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subscriber_id, "Dispatch workers stopped; dropping event");
                SubmitOutcome::ShutDown
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.inner.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop the workers. Queued submissions that were not yet picked up are abandoned.
    pub fn shutdown(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let _ = self.inner.shutdown_tx.send(());
            info!(stats = ?self.stats(), "Event dispatcher shutting down");
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Submission>>>,
    publisher: Arc<dyn EventPublisher>,
    counters: Arc<Counters>,
    event_name: Arc<str>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(worker_id, "Dispatch worker started");

    loop {
        let next = tokio::select! {
            _ = shutdown_rx.recv() => break,
            next = async { receiver.lock().await.recv().await } => next,
        };
        let Some(submission) = next else {
            break;
        };

        let subscriber_id = submission.snapshot.id;
        let queued_ms = submission.submitted_at.elapsed().as_millis() as u64;

        let result = AssertUnwindSafe(publisher.publish(&event_name, &submission.snapshot))
            .catch_unwind()
            .await;

        match result {
            Ok(PublishOutcome::Sent) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, subscriber_id, queued_ms, "Event dispatched");
            }
            Ok(PublishOutcome::Dropped { reason }) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, subscriber_id, reason = %reason, "Event dropped by publisher");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker_id, subscriber_id, "Publisher panicked; event dropped");
            }
        }
    }

    debug!(worker_id, "Dispatch worker stopped");
}
