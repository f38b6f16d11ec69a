//! Metacognitive Engine (spec §4.E): per-topic confidence tracking and
//! cooldown-gated learning-round scheduling.

use autarch_broker::EventBroker;
use autarch_persistence::PersistenceStore;
use autarch_types::{EventType, FailurePattern, LearningTrigger, Outcome};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

pub struct MetacogConfig {
    pub confidence_threshold: f64,
    pub learning_cooldown_seconds: i64,
    pub min_samples: usize,
    pub history_window: usize,
}

/// Per-topic bookkeeping: outcome history plus whether a learning round is
/// currently in flight (spec §8 invariant 7: at most one per topic,
/// enforced here in addition to the cooldown window).
struct TopicState {
    pattern: FailurePattern,
    in_flight: bool,
    last_confidence_bucket: i32,
}

pub struct MetacognitiveEngine {
    topics: DashMap<String, TopicState>,
    config: MetacogConfig,
    broker: Arc<EventBroker>,
    persistence: Arc<PersistenceStore>,
}

fn confidence_bucket(confidence: f64) -> i32 {
    (confidence / 0.05).floor() as i32
}

impl MetacognitiveEngine {
    pub fn new(config: MetacogConfig, broker: Arc<EventBroker>, persistence: Arc<PersistenceStore>) -> Self {
        Self {
            topics: DashMap::new(),
            config,
            broker,
            persistence,
        }
    }

    pub fn record_outcome(&self, topic: &str, success: bool, error_tag: Option<String>) {
        let mut entry = self.topics.entry(topic.to_string()).or_insert_with(|| TopicState {
            pattern: FailurePattern::new(topic, self.config.history_window),
            in_flight: false,
            last_confidence_bucket: confidence_bucket(1.0),
        });

        entry.pattern.record(Outcome {
            success,
            timestamp: Utc::now(),
            error_tag,
        });

        let new_confidence = entry.pattern.confidence();
        let new_bucket = confidence_bucket(new_confidence);
        if new_bucket != entry.last_confidence_bucket {
            entry.last_confidence_bucket = new_bucket;
            let topic_owned = topic.to_string();
            drop(entry);
            self.broker.publish(
                EventType::ConfidenceChanged,
                serde_json::json!({ "topic": topic_owned, "confidence": new_confidence }),
                EventType::ConfidenceChanged.default_priority(),
            );
        }
    }

    /// Confidence in `[0, 1]`; an unseen topic reports 1.0 (no evidence,
    /// spec §9 "no evidence implies no alarm").
    pub fn confidence(&self, topic: &str) -> f64 {
        self.topics
            .get(topic)
            .map(|t| t.pattern.confidence())
            .unwrap_or(1.0)
    }

    /// Mean of all known topics' confidence; 1.0 if no topic has recorded
    /// an outcome yet.
    pub fn system_confidence(&self) -> f64 {
        if self.topics.is_empty() {
            return 1.0;
        }
        let sum: f64 = self.topics.iter().map(|t| t.pattern.confidence()).sum();
        sum / self.topics.len() as f64
    }

    /// Scans all topics for the first eligible learning trigger: confidence
    /// below threshold, cooldown elapsed since the last trigger's
    /// completion, enough samples in the window, and no round already
    /// in-flight for that topic. Marks the topic in-flight on trigger.
    pub fn poll(&self) -> Option<LearningTrigger> {
        let now = Utc::now();
        let cooldown = ChronoDuration::seconds(self.config.learning_cooldown_seconds);

        for mut entry in self.topics.iter_mut() {
            if entry.in_flight {
                continue;
            }
            let confidence = entry.pattern.confidence();
            if confidence >= self.config.confidence_threshold {
                continue;
            }
            if entry.pattern.history.len() < self.config.min_samples {
                continue;
            }
            if let Some(last) = entry.pattern.last_trigger_time {
                if now.signed_duration_since(last) < cooldown {
                    continue;
                }
            }

            entry.in_flight = true;
            let rounds = ((10.0 * (1.0 - confidence)).round() as i64).clamp(3, 10) as u32;
            let failure_reason = entry
                .pattern
                .top_error_tag()
                .unwrap_or_else(|| "unspecified".to_string());
            let topic = entry.key().clone();

            info!(topic, confidence, rounds, "learning trigger produced");
            return Some(LearningTrigger {
                topic,
                confidence,
                rounds,
                failure_reason,
            });
        }
        None
    }

    /// Records completion time as "now" so the cooldown begins from
    /// completion, clears the in-flight flag, and — on positive
    /// improvement — persists an EvolutionRecord and publishes
    /// `evolution_applied`.
    pub fn on_learning_complete(&self, topic: &str, delta_confidence: f64, failure_reason: &str) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.pattern.last_trigger_time = Some(Utc::now());
            entry.in_flight = false;
        }

        if delta_confidence > 0.0 {
            match self
                .persistence
                .record_evolution(topic, failure_reason, "start_federated_training", delta_confidence)
            {
                Ok(id) => {
                    self.broker.publish(
                        EventType::EvolutionApplied,
                        serde_json::json!({
                            "id": id,
                            "topic": topic,
                            "observed_improvement": delta_confidence,
                        }),
                        EventType::EvolutionApplied.default_priority(),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, topic, "failed to persist evolution record");
                    self.broker.publish(
                        EventType::SystemAlert,
                        serde_json::json!({
                            "reason": "evolution_record_persist_failed",
                            "topic": topic,
                            "error": e.to_string(),
                        }),
                        EventType::SystemAlert.default_priority(),
                    );
                }
            }
        }
    }
}
