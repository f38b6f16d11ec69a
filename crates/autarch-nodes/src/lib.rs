//! Node Registry (spec §4.D): worker lifecycle, registration auth,
//! reputation-weighted target selection, and heartbeat health tracking.

pub mod auth;
pub mod error;

pub use auth::ReplayGuard;
pub use error::NodeRegistryError;

use autarch_types::{random_id, NodeRecord, NodeStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use tracing::{info, warn};

pub struct NodeRegistryConfig {
    pub heartbeat_timeout_seconds: i64,
    pub reputation_up: f64,
    pub reputation_down: f64,
}

pub struct NodeRegistry {
    nodes: DashMap<String, NodeRecord>,
    config: NodeRegistryConfig,
}

impl NodeRegistry {
    pub fn new(config: NodeRegistryConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            config,
        }
    }

    /// `Connecting -> Registered`: assigns a fresh `node_id` and reputation
    /// 0.5. Authentication happens at the gateway before this is called;
    /// the registry itself only knows about valid, already-verified
    /// registrations.
    pub fn register(
        &self,
        node_type: String,
        capabilities: HashSet<String>,
        resources: serde_json::Value,
    ) -> String {
        let node_id = random_id();
        let record = NodeRecord::new(node_id.clone(), node_type, capabilities, resources);
        info!(node_id = %node_id, "node registered");
        self.nodes.insert(node_id.clone(), record);
        node_id
    }

    /// `Stale -> Healthy` or `Registered -> Healthy` on a fresh heartbeat.
    pub fn heartbeat(&self, node_id: &str, resources: serde_json::Value) -> Result<(), NodeRegistryError> {
        let mut entry = self.nodes.get_mut(node_id).ok_or(NodeRegistryError::UnknownNode)?;
        entry.last_heartbeat = Utc::now();
        entry.resources = resources;
        if entry.status != NodeStatus::Disconnected {
            entry.status = NodeStatus::Healthy;
        }
        Ok(())
    }

    /// Sweeps all nodes, transitioning `Registered/Healthy -> Stale` past
    /// `heartbeat_timeout`, and `Stale -> Disconnected` past one additional
    /// timeout window (spec §4.D). Returns the ids that just disconnected,
    /// so the caller can free resources and emit `node_disconnected`.
    pub fn sweep_health(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = ChronoDuration::seconds(self.config.heartbeat_timeout_seconds);
        let grace = timeout;
        let mut disconnected = Vec::new();

        for mut entry in self.nodes.iter_mut() {
            let elapsed = now.signed_duration_since(entry.last_heartbeat);
            match entry.status {
                NodeStatus::Registered | NodeStatus::Healthy if elapsed > timeout => {
                    entry.status = NodeStatus::Stale;
                    warn!(node_id = %entry.node_id, "node went stale");
                }
                NodeStatus::Stale if elapsed > timeout + grace => {
                    entry.status = NodeStatus::Disconnected;
                    disconnected.push(entry.node_id.clone());
                }
                _ => {}
            }
        }

        for id in &disconnected {
            self.nodes.remove(id);
            info!(node_id = %id, "node disconnected; id freed");
        }
        disconnected
    }

    pub fn disconnect(&self, node_id: &str) {
        self.nodes.remove(node_id);
        info!(node_id, "node disconnected (transport closed)");
    }

    /// `rep <- clamp(rep + delta, 0, 1)` after a task outcome.
    pub fn record_outcome(&self, node_id: &str, success: bool) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            let delta = if success {
                self.config.reputation_up
            } else {
                -self.config.reputation_down
            };
            entry.reputation = (entry.reputation + delta).clamp(0.0, 1.0);
        }
    }

    /// Filters to Healthy nodes whose capabilities are a superset of
    /// `required`, then samples proportional to reputation (ties toward
    /// earliest heartbeat). Nodes in `exclude` are never chosen — used by
    /// the orchestrator's retry-on-failure reselection.
    pub fn choose_node(
        &self,
        required: &HashSet<String>,
        exclude: &HashSet<String>,
    ) -> Result<String, NodeRegistryError> {
        let candidates: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|e| e.status == NodeStatus::Healthy)
            .filter(|e| e.has_capabilities(required))
            .filter(|e| !exclude.contains(&e.node_id))
            .map(|e| e.clone())
            .collect();

        if candidates.is_empty() {
            return Err(NodeRegistryError::NoneAvailable);
        }

        let total_reputation: f64 = candidates.iter().map(|c| c.reputation.max(0.01)).sum();
        let mut pick = rand::thread_rng().gen_range(0.0..total_reputation);
        for candidate in &candidates {
            let weight = candidate.reputation.max(0.01);
            if pick < weight {
                return Ok(candidate.node_id.clone());
            }
            pick -= weight;
        }
        // Floating-point edge case: fall back to earliest heartbeat.
        Ok(candidates
            .iter()
            .min_by_key(|c| c.last_heartbeat)
            .expect("candidates is non-empty")
            .node_id
            .clone())
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.get(node_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(NodeRegistryConfig {
            heartbeat_timeout_seconds: 90,
            reputation_up: 0.02,
            reputation_down: 0.05,
        })
    }

    fn caps(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_then_disconnect_frees_node_id() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        registry.disconnect(&id);
        assert!(registry.get(&id).is_none());
        let second = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        assert_ne!(id, second);
    }

    #[test]
    fn choose_node_requires_healthy_status() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        // Freshly registered, not yet Healthy.
        let result = registry.choose_node(&caps(&["echo"]), &HashSet::new());
        assert!(matches!(result, Err(NodeRegistryError::NoneAvailable)));

        registry.heartbeat(&id, serde_json::json!({})).unwrap();
        let result = registry.choose_node(&caps(&["echo"]), &HashSet::new());
        assert_eq!(result.unwrap(), id);
    }

    #[test]
    fn choose_node_respects_capability_subset() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        registry.heartbeat(&id, serde_json::json!({})).unwrap();
        let result = registry.choose_node(&caps(&["gpu"]), &HashSet::new());
        assert!(matches!(result, Err(NodeRegistryError::NoneAvailable)));
    }

    #[test]
    fn choose_node_excludes_given_ids() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        registry.heartbeat(&id, serde_json::json!({})).unwrap();
        let mut exclude = HashSet::new();
        exclude.insert(id.clone());
        let result = registry.choose_node(&caps(&["echo"]), &exclude);
        assert!(matches!(result, Err(NodeRegistryError::NoneAvailable)));
    }

    #[test]
    fn reputation_clamped_to_unit_interval() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        for _ in 0..200 {
            registry.record_outcome(&id, true);
        }
        assert!(registry.get(&id).unwrap().reputation <= 1.0);
        for _ in 0..200 {
            registry.record_outcome(&id, false);
        }
        assert!(registry.get(&id).unwrap().reputation >= 0.0);
    }

    #[test]
    fn sweep_marks_stale_then_disconnected() {
        let registry = registry();
        let id = registry.register("worker".into(), caps(&["echo"]), serde_json::json!({}));
        registry.heartbeat(&id, serde_json::json!({})).unwrap();

        let now = Utc::now();
        let past_timeout = now + ChronoDuration::seconds(91);
        let disconnected = registry.sweep_health(past_timeout);
        assert!(disconnected.is_empty());
        assert_eq!(registry.get(&id).unwrap().status, NodeStatus::Stale);

        let past_grace = now + ChronoDuration::seconds(91 + 91);
        let disconnected = registry.sweep_health(past_grace);
        assert_eq!(disconnected, vec![id.clone()]);
        assert!(registry.get(&id).is_none());
    }
}
