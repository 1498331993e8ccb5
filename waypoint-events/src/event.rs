use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope metadata attached to every emitted [`Event`].
///
/// `id` is unique per emission regardless of how many times the same
/// logical occurrence is re-emitted; callers that want idempotent retries
/// should carry their own correlation id instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u128,
    pub source: String,
    pub correlation_id: Option<Uuid>,
    pub version: u32,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            source: source.into(),
            correlation_id: None,
            version: 1,
        }
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// The domain-event envelope fields, present only on aggregate-scoped events.
///
/// `sequence_number` must be monotonically increasing per `aggregate_id`;
/// [`EventBus::emit_domain`](crate::EventBus::emit_domain) assigns it
/// automatically unless the caller pre-populates one greater than the last
/// seen for that aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEnvelope {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub sequence_number: u64,
}

/// A typed envelope routed through pipelines to subscribers.
///
/// `data` is intentionally opaque (`serde_json::Value`) at the bus level —
/// subscribers downcast/deserialize it into whatever shape they expect. This
/// keeps the bus itself free of generic parameters so that a single
/// `EventBus` instance can carry every event type an application defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
    pub domain: Option<DomainEnvelope>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: EventMetadata::new("waypoint"),
            domain: None,
        }
    }

    pub fn domain(
        event_type: impl Into<String>,
        data: serde_json::Value,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(event_type, data);
        event.domain = Some(DomainEnvelope {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            sequence_number: 0,
        });
        event
    }

    pub fn is_domain_event(&self) -> bool {
        self.domain.is_some()
    }
}
