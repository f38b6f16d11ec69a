//! The explicit `Core` value (spec §9 "Global mutable state"): references
//! to the five components, constructed once at startup and handed to every
//! connection handler. No module-level globals.
//!
//! The Orchestrator is held one level up, in `AppState`, not here: it needs
//! a `RemoteDispatcher` which itself needs a `Core` to reach the live node
//! connection table, so `Core` has to exist before the Orchestrator can be
//! built.

use crate::ratelimit::RegistrationLimiter;
use autarch_broker::EventBroker;
use autarch_metacog::MetacognitiveEngine;
use autarch_nodes::{NodeRegistry, ReplayGuard};
use autarch_persistence::PersistenceStore;
use autarch_tools::{ToolFault, ToolRegistry};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

pub struct Core {
    pub broker: Arc<EventBroker>,
    pub persistence: Arc<PersistenceStore>,
    pub tools: Arc<ToolRegistry>,
    pub nodes: Arc<NodeRegistry>,
    pub metacog: Arc<MetacognitiveEngine>,
    pub replay_guard: Arc<ReplayGuard>,
    pub registration_secret: Vec<u8>,
    /// Per-address backoff on failed registration attempts (spec §6).
    pub registration_limiter: Arc<RegistrationLimiter>,
    /// Live send-halves for currently connected nodes, keyed by `node_id`.
    pub node_senders: Arc<DashMap<String, tokio::sync::mpsc::UnboundedSender<String>>>,
    /// In-flight dispatches awaiting a `result` message, keyed by `task_id`.
    pub pending_results: Arc<DashMap<String, oneshot::Sender<Result<serde_json::Value, ToolFault>>>>,
}

/// Bundles the Core with the Orchestrator that sits on top of it; this is
/// what connection handlers and the axum router actually receive.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    pub orchestrator: Arc<autarch_orchestrator::Orchestrator>,
}
