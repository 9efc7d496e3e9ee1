//! AsyncDispatcher Tests
//!
//! Tests for:
//! - Submission returning before the publish happens
//! - Drop-newest on a full queue
//! - Workers surviving a panicking publisher
//! - Shutdown behavior

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use common::{create_test_snapshot, test_config, wait_until, MockTransport};
use pc_common::{SubscriberSnapshot, SubscriptionPlan};
use pc_relay::{
    AsyncDispatcher, ConnectionManager, DispatcherConfig, EventBroadcaster, EventPublisher,
    PublishOutcome, SubmitOutcome,
};

/// Publisher that waits for a permit before recording each snapshot
struct GatedPublisher {
    gate: Arc<Semaphore>,
    started: AtomicU32,
    published: parking_lot::Mutex<Vec<i64>>,
    panic_on: Option<i64>,
}

impl GatedPublisher {
    fn new(permits: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(permits)),
            started: AtomicU32::new(0),
            published: parking_lot::Mutex::new(Vec::new()),
            panic_on: None,
        }
    }

    fn panicking_on(id: i64) -> Self {
        Self {
            panic_on: Some(id),
            ..Self::new(Semaphore::MAX_PERMITS)
        }
    }

    fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    fn published(&self) -> Vec<i64> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for GatedPublisher {
    async fn publish(&self, _event_name: &str, snapshot: &SubscriberSnapshot) -> PublishOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.panic_on == Some(snapshot.id) {
            panic!("publisher failure for subscriber {}", snapshot.id);
        }
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                return PublishOutcome::Dropped {
                    reason: "gate closed".to_string(),
                }
            }
        }
        self.published.lock().push(snapshot.id);
        PublishOutcome::Sent
    }
}

fn config(workers: usize, queue_capacity: usize) -> DispatcherConfig {
    DispatcherConfig {
        workers,
        queue_capacity,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_submit_returns_before_publish() {
    let publisher = Arc::new(GatedPublisher::new(0));
    let dispatcher = AsyncDispatcher::start(config(2, 8), publisher.clone());

    let outcome = dispatcher.submit(create_test_snapshot(1, SubscriptionPlan::Pro));
    assert_eq!(outcome, SubmitOutcome::Accepted);
    assert!(publisher.published().is_empty());

    publisher.gate.add_permits(1);
    assert!(wait_until(|| publisher.published() == vec![1]).await);
    assert!(wait_until(|| dispatcher.stats().sent == 1).await);
    assert_eq!(dispatcher.stats().submitted, 1);
}

#[tokio::test]
async fn test_full_queue_drops_newest() {
    let publisher = Arc::new(GatedPublisher::new(0));
    let dispatcher = AsyncDispatcher::start(config(1, 1), publisher.clone());

    assert_eq!(dispatcher.submit(create_test_snapshot(1, SubscriptionPlan::Free)), SubmitOutcome::Accepted);
    // Worker holds the first submission, blocked on the gate
    assert!(wait_until(|| publisher.started() == 1).await);

    assert_eq!(dispatcher.submit(create_test_snapshot(2, SubscriptionPlan::Free)), SubmitOutcome::Accepted);
    assert_eq!(dispatcher.submit(create_test_snapshot(3, SubscriptionPlan::Free)), SubmitOutcome::QueueFull);

    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.dropped, 1);

    publisher.gate.add_permits(10);
    assert!(wait_until(|| publisher.published() == vec![1, 2]).await);
}

#[tokio::test]
async fn test_worker_survives_publisher_panic() {
    let publisher = Arc::new(GatedPublisher::panicking_on(1));
    let dispatcher = AsyncDispatcher::start(config(1, 8), publisher.clone());

    dispatcher.submit(create_test_snapshot(1, SubscriptionPlan::Basic));
    dispatcher.submit(create_test_snapshot(2, SubscriptionPlan::Basic));

    assert!(wait_until(|| publisher.published() == vec![2]).await);
    assert!(wait_until(|| dispatcher.stats().failed == 1).await);
    assert_eq!(dispatcher.stats().sent, 1);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_dropped() {
    let publisher = Arc::new(GatedPublisher::new(Semaphore::MAX_PERMITS));
    let dispatcher = AsyncDispatcher::start(config(2, 8), publisher.clone());

    dispatcher.shutdown();
    assert!(!dispatcher.is_running());

    let outcome = dispatcher.submit(create_test_snapshot(1, SubscriptionPlan::Free));
    assert_eq!(outcome, SubmitOutcome::ShutDown);
    assert_eq!(dispatcher.stats().dropped, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_end_to_end_through_broadcaster() {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(test_config(3, Duration::from_millis(10)), transport.clone());
    let broadcaster = Arc::new(EventBroadcaster::new(manager));
    let dispatcher = AsyncDispatcher::start(config(2, 8), broadcaster);

    for id in 1..=3 {
        assert_eq!(
            dispatcher.submit(create_test_snapshot(id, SubscriptionPlan::Pro)),
            SubmitOutcome::Accepted
        );
    }

    assert!(wait_until(|| transport.emitted().len() == 3).await);
    let mut ids: Vec<i64> = transport
        .emitted()
        .iter()
        .map(|(_, payload)| payload["id"].as_i64().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
    // Concurrent first publishes still share a single connect
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_blocked_channel_does_not_block_submit() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = MockTransport::gated(gate.clone());
    let manager = ConnectionManager::new(test_config(3, Duration::from_millis(10)), transport.clone());
    let dispatcher = AsyncDispatcher::start(config(1, 8), Arc::new(EventBroadcaster::new(manager)));

    let started = std::time::Instant::now();
    for id in 1..=5 {
        dispatcher.submit(create_test_snapshot(id, SubscriptionPlan::Free));
    }
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(transport.emitted().is_empty());

    gate.add_permits(5);
    assert!(wait_until(|| transport.emitted().len() == 5).await);
}
