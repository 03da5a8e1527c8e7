//! Bounded in-memory buffer of recent delivery attempts.
//!
//! Purely diagnostic: not persisted, cleared on process restart. Oldest
//! entries evict first once capacity is reached.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::types::{Direction, MessageKind};

/// Outcome of one delivery destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationResult {
    /// Destination URL, or the synthetic `transport` target for sends.
    pub target: String,
    /// Whether the destination accepted the delivery.
    pub ok: bool,
    /// HTTP status or error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Overall outcome across all destinations of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Every destination accepted.
    Delivered,
    /// Some destinations accepted.
    Partial,
    /// No destination accepted.
    Failed,
}

impl DeliveryStatus {
    /// Aggregate per-destination outcomes.
    pub fn from_results(results: &[DestinationResult]) -> Self {
        let ok = results.iter().filter(|r| r.ok).count();
        if ok == results.len() {
            Self::Delivered
        } else if ok == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

/// One recorded delivery attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    /// Record id.
    pub id: String,
    /// When the attempt happened.
    pub timestamp: DateTime<Utc>,
    /// Owning instance.
    pub instance_id: String,
    /// Direction of the originating message; absent for status events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Counterparty phone, when the attempt concerns a message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Content or event kind label.
    pub kind: String,
    /// Aggregate outcome.
    pub status: DeliveryStatus,
    /// Per-destination outcomes.
    pub destinations: Vec<DestinationResult>,
}

impl DeliveryRecord {
    /// Record for a webhook fan-out of an inbound message.
    pub fn message(
        instance_id: &str,
        direction: Direction,
        phone: &str,
        kind: MessageKind,
        destinations: Vec<DestinationResult>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            instance_id: instance_id.to_owned(),
            direction: Some(direction),
            phone: Some(phone.to_owned()),
            kind: kind.as_str().to_owned(),
            status: DeliveryStatus::from_results(&destinations),
            destinations,
        }
    }

    /// Record for a webhook fan-out of a status transition.
    pub fn status_event(instance_id: &str, destinations: Vec<DestinationResult>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            instance_id: instance_id.to_owned(),
            direction: None,
            phone: None,
            kind: "status".to_owned(),
            status: DeliveryStatus::from_results(&destinations),
            destinations,
        }
    }

    /// Record for one outbound send through the transport.
    pub fn outbound_send(
        instance_id: &str,
        phone: &str,
        kind: MessageKind,
        ok: bool,
        detail: Option<String>,
    ) -> Self {
        let destinations = vec![DestinationResult {
            target: "transport".to_owned(),
            ok,
            detail,
        }];
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            instance_id: instance_id.to_owned(),
            direction: Some(Direction::Outbound),
            phone: Some(phone.to_owned()),
            kind: kind.as_str().to_owned(),
            status: DeliveryStatus::from_results(&destinations),
            destinations,
        }
    }
}

/// Fixed-capacity FIFO of recent [`DeliveryRecord`]s.
pub struct LogRing {
    capacity: usize,
    entries: Mutex<VecDeque<DeliveryRecord>>,
}

impl LogRing {
    /// Ring holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub async fn push(&self, record: DeliveryRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().await;
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Up to `limit` most recent records, newest first.
    pub async fn list(&self, limit: usize) -> Vec<DeliveryRecord> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Drop all records.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Current number of records.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when no records are buffered.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
