//! Event bus
//!
//! One in-process broadcaster layered over the event store. Publishing
//! appends to storage — which assigns the next dense sequence number from
//! the run record — then fans out to subscribers. Delivery is best-effort:
//! a panicking subscriber is logged and skipped, never stopping the bus.
//! Per-run ordering holds because each run serializes its publishes
//! through its write queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use tabflow_core::{RunEvent, RunEventKind};
use tabflow_storage::{Storage, StoreError};

pub type EventListener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Identifies a subscription for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// None subscribes to every run
    run_id: Option<Uuid>,
    listener: EventListener,
}

/// Append-then-fan-out event broadcaster
pub struct EventBus {
    storage: Arc<dyn Storage>,
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Append an event to the run's log and deliver it to subscribers
    pub async fn publish(
        &self,
        run_id: Uuid,
        kind: RunEventKind,
    ) -> Result<RunEvent, StoreError> {
        let event = self.storage.append_event(run_id, kind).await?;
        self.fan_out(&event);
        Ok(event)
    }

    /// Register a listener, optionally filtered to one run
    pub fn subscribe(&self, run_id: Option<Uuid>, listener: EventListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().push(Subscription {
            id,
            run_id,
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn fan_out(&self, event: &RunEvent) {
        // Snapshot listeners so delivery happens outside the lock
        let listeners: Vec<EventListener> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.run_id.is_none() || s.run_id == Some(event.run_id))
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };

        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event)
            }));
            if result.is_err() {
                error!(run_id = %event.run_id, seq = event.seq, "event subscriber panicked");
            }
        }
    }
}

/// Forward events matching `run_id` into an unbounded channel; handy for
/// tests and connection tasks that consume events asynchronously
pub fn channel_subscriber(
    bus: &EventBus,
    run_id: Option<Uuid>,
) -> (
    SubscriptionId,
    tokio::sync::mpsc::UnboundedReceiver<RunEvent>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let id = bus.subscribe(
        run_id,
        Arc::new(move |event| {
            if tx.send(event.clone()).is_err() {
                warn!("event channel receiver dropped");
            }
        }),
    );
    (id, rx)
}
