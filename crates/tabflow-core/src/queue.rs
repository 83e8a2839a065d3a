//! Queue items and leases
//!
//! A queue item is the scheduling record for a run. Claim ordering is
//! priority descending, then created-at ascending. Items in `running` or
//! `paused` always carry a lease; `queued` items never do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::{DebugConfig, TriggerContext};
use crate::JsonMap;

/// Scheduling status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    Running,
    Paused,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// A timed claim on a queue item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Durable scheduling record for a run; keyed by the run id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Equal to the run id
    pub id: Uuid,

    pub flow_id: Uuid,

    pub priority: i32,

    pub created_at: DateTime<Utc>,

    pub max_attempts: u32,

    #[serde(default)]
    pub args: JsonMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugConfig>,

    pub status: QueueItemStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
}

impl QueueItem {
    pub fn queued(id: Uuid, flow_id: Uuid, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            flow_id,
            priority,
            created_at: now,
            max_attempts: 1,
            args: JsonMap::new(),
            trigger: None,
            debug: None,
            status: QueueItemStatus::Queued,
            lease: None,
        }
    }

    /// Claim-order comparison: priority descending, created-at ascending
    pub fn claim_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn claim_order_prefers_priority_then_fifo() {
        let now = Utc::now();
        let mut items = vec![
            QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now + Duration::seconds(2)),
            QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 5, now + Duration::seconds(3)),
            QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now),
            QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 5, now + Duration::seconds(1)),
        ];
        items.sort_by(QueueItem::claim_order);

        let priorities: Vec<i32> = items.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![5, 5, 0, 0]);
        // FIFO within equal priority
        assert!(items[0].created_at < items[1].created_at);
        assert!(items[2].created_at < items[3].created_at);
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            owner_id: "owner-a".to_string(),
            expires_at: now,
        };
        assert!(lease.is_expired(now));
        assert!(!lease.is_expired(now - Duration::seconds(1)));
    }
}
