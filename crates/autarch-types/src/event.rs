//! Event taxonomy (spec §6) and the envelope the broker fans out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The `type` field within an event payload, with its default priority
/// baked in via [`EventType::default_priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EvolutionApplied,
    ConfidenceChanged,
    LearningStarted,
    LearningCompleted,
    NodeRegistered,
    NodeDisconnected,
    TaskDispatched,
    TaskCompleted,
    ToolExecuted,
    SystemAlert,
}

impl EventType {
    /// Default priority from spec §6's event taxonomy table.
    pub fn default_priority(self) -> i32 {
        match self {
            EventType::SystemAlert => 10,
            EventType::EvolutionApplied => 8,
            EventType::ConfidenceChanged => 7,
            EventType::LearningStarted | EventType::LearningCompleted => 6,
            EventType::NodeRegistered | EventType::NodeDisconnected => 5,
            EventType::TaskDispatched | EventType::TaskCompleted => 4,
            EventType::ToolExecuted => 3,
        }
    }
}

/// A subscriber's interest: a single event type, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    Only(EventType),
    All,
}

impl TypeFilter {
    pub fn matches(&self, ty: EventType) -> bool {
        match self {
            TypeFilter::Only(t) => *t == ty,
            TypeFilter::All => true,
        }
    }

    /// Parses the wire form used by `subscribe_events.event_type` (`"*"` or a type name).
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "*" {
            return Some(TypeFilter::All);
        }
        serde_json::from_value(serde_json::Value::String(raw.to_string()))
            .ok()
            .map(TypeFilter::Only)
    }
}

/// A published event (spec §3 `Event`). `id` is globally monotonic within a
/// process run; ordering within a subscriber's stream is priority-then-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub priority: i32,
}

impl Event {
    /// Priority-then-id ordering: higher priority first, ties by lower id first.
    pub fn delivery_order_key(&self) -> (std::cmp::Reverse<i32>, u64) {
        (std::cmp::Reverse(self.priority), self.id)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    /// `BinaryHeap` is a max-heap; we want the *most deliverable* event on top,
    /// i.e. highest priority, then lowest id — so this orders "most urgent" as greatest.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}
