//! Core data model (spec §3): nodes, failure patterns, evolution records,
//! tool metrics, and the plan/step shape the orchestrator compiles into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// `Connecting -> Registered -> Healthy <-> Stale -> Disconnected` (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Connecting,
    Registered,
    Healthy,
    Stale,
    Disconnected,
}

/// The durable, transport-agnostic half of a Node record. The live transport
/// handle is kept alongside this in the node registry's own connection table,
/// never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub node_type: String,
    pub capabilities: HashSet<String>,
    pub resources: serde_json::Value,
    pub reputation: f64,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(node_id: String, node_type: String, capabilities: HashSet<String>, resources: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            node_id,
            node_type,
            capabilities,
            resources,
            reputation: 0.5,
            status: NodeStatus::Registered,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

// ---------------------------------------------------------------------------
// FailurePattern (per-topic outcome history)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub error_tag: Option<String>,
}

/// Bounded history of outcomes for one topic. `confidence` is the fraction
/// of successes in the window; an empty window reports 1.0 (spec §9: "no
/// evidence ⇒ no alarm").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub topic: String,
    pub history: VecDeque<Outcome>,
    pub window: usize,
    pub last_trigger_time: Option<DateTime<Utc>>,
}

impl FailurePattern {
    pub fn new(topic: impl Into<String>, window: usize) -> Self {
        Self {
            topic: topic.into(),
            history: VecDeque::with_capacity(window),
            window,
            last_trigger_time: None,
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        if self.history.len() >= self.window {
            self.history.pop_front();
        }
        self.history.push_back(outcome);
    }

    pub fn confidence(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        let successes = self.history.iter().filter(|o| o.success).count();
        successes as f64 / self.history.len() as f64
    }

    /// The most frequently occurring error tag in the current window, if any.
    pub fn top_error_tag(&self) -> Option<String> {
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for o in &self.history {
            if let Some(tag) = o.error_tag.as_deref() {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(tag, _)| tag.to_string())
    }
}

// ---------------------------------------------------------------------------
// Evolution & tool metrics (durable records)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub id: u64,
    pub topic: String,
    pub failure_reason: String,
    pub applied_fix: String,
    pub observed_improvement: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetricEvent {
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_seconds: f64,
    pub context: serde_json::Value,
}

/// Running per-tool metrics, updated only by the tool's own executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_seconds: f64,
    pub last_error: Option<String>,
}

impl ToolMetrics {
    pub fn record_success(&mut self, latency_seconds: f64) {
        self.success_count += 1;
        self.total_latency_seconds += latency_seconds;
    }

    pub fn record_failure(&mut self, latency_seconds: f64, error: impl Into<String>) {
        self.failure_count += 1;
        self.total_latency_seconds += latency_seconds;
        self.last_error = Some(error.into());
    }
}

// ---------------------------------------------------------------------------
// Plans and steps (Intent Compiler output)
// ---------------------------------------------------------------------------

/// One tool invocation bound with arguments and a topic tag (spec glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub topic_tag: String,
}

/// An ordered sequence of steps produced by the Intent Compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// Optional durable record of a trained model version (persistence layout, spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: u64,
    pub topic: String,
    pub version: String,
    pub params_hash: String,
    pub created_at: DateTime<Utc>,
    pub metrics: serde_json::Value,
}

/// Advisory output of `MetacognitiveEngine::poll` (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningTrigger {
    pub topic: String,
    pub confidence: f64,
    pub rounds: u32,
    pub failure_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_failure_pattern_has_confidence_one() {
        let fp = FailurePattern::new("general", 100);
        assert_eq!(fp.confidence(), 1.0);
    }

    #[test]
    fn history_len_bounded_by_window() {
        let mut fp = FailurePattern::new("optimization", 3);
        for i in 0..10 {
            fp.record(Outcome {
                success: i % 2 == 0,
                timestamp: Utc::now(),
                error_tag: None,
            });
        }
        assert_eq!(fp.history.len(), 3);
    }

    #[test]
    fn node_capability_subset_check() {
        let node = NodeRecord::new(
            "n1".into(),
            "worker".into(),
            ["echo".to_string(), "work".to_string()].into_iter().collect(),
            serde_json::json!({}),
        );
        let required: HashSet<String> = ["echo".to_string()].into_iter().collect();
        assert!(node.has_capabilities(&required));
        let missing: HashSet<String> = ["gpu".to_string()].into_iter().collect();
        assert!(!node.has_capabilities(&missing));
    }
}
