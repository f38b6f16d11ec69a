//! The orchestration loop (spec §4.F): drives the Node Registry, Tool
//! Registry, Metacognitive Engine, and Event Broker through one compiled
//! plan at a time.

use crate::compiler::IntentCompiler;
use crate::dispatch::RemoteDispatcher;
use autarch_broker::EventBroker;
use autarch_metacog::MetacognitiveEngine;
use autarch_nodes::NodeRegistry;
use autarch_tools::{ToolRegistry, ToolResult};
use autarch_types::{ErrorKind, EventType, Plan, Step, WireError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct OrchestratorConfig {
    pub max_retries: u32,
}

pub struct Orchestrator {
    compiler: IntentCompiler,
    config: OrchestratorConfig,
    broker: Arc<EventBroker>,
    tools: Arc<ToolRegistry>,
    nodes: Arc<NodeRegistry>,
    metacog: Arc<MetacognitiveEngine>,
    remote: Arc<dyn RemoteDispatcher>,
}

impl Orchestrator {
    pub fn new(
        default_tool: impl Into<String>,
        config: OrchestratorConfig,
        broker: Arc<EventBroker>,
        tools: Arc<ToolRegistry>,
        nodes: Arc<NodeRegistry>,
        metacog: Arc<MetacognitiveEngine>,
        remote: Arc<dyn RemoteDispatcher>,
    ) -> Self {
        Self {
            compiler: IntentCompiler::new(default_tool),
            config,
            broker,
            tools,
            nodes,
            metacog,
            remote,
        }
    }

    /// Compiles `raw_intent` and runs its plan to completion or first
    /// failure (fail-fast, spec §4.F step 4). Always polls the
    /// metacognitive engine afterward and schedules a background learning
    /// round if one is warranted.
    pub async fn handle_intent(&self, raw_intent: &str) -> Result<serde_json::Value, WireError> {
        let plan = self.compiler.compile(raw_intent);
        let result = self.run_plan(&plan).await;
        self.maybe_schedule_learning();
        result
    }

    async fn run_plan(&self, plan: &Plan) -> Result<serde_json::Value, WireError> {
        let mut outputs = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let output = self.run_step(step).await?;
            outputs.push(output);
        }
        Ok(serde_json::Value::Array(outputs))
    }

    async fn run_step(&self, step: &Step) -> Result<serde_json::Value, WireError> {
        let dependencies: HashSet<String> = self
            .tools
            .get(&step.tool_name)
            .map(|t| t.dependencies().into_iter().collect())
            .unwrap_or_default();

        self.broker.publish(
            EventType::TaskDispatched,
            serde_json::json!({ "tool": step.tool_name, "topic": step.topic_tag }),
            EventType::TaskDispatched.default_priority(),
        );

        let outcome = if dependencies.is_empty() {
            self.run_local(step).await
        } else {
            self.run_remote_with_retries(step, &dependencies).await
        };

        self.broker.publish(
            EventType::TaskCompleted,
            serde_json::json!({ "tool": step.tool_name, "topic": step.topic_tag, "success": outcome.is_ok() }),
            EventType::TaskCompleted.default_priority(),
        );

        let error_tag = outcome.as_ref().err().map(|e: &WireError| format!("{:?}", e.kind));
        self.metacog
            .record_outcome(&step.topic_tag, outcome.is_ok(), error_tag);

        outcome
    }

    async fn run_local(&self, step: &Step) -> Result<serde_json::Value, WireError> {
        match self.tools.execute(&step.tool_name, step.args.clone()).await {
            ToolResult::Success { data, .. } => Ok(data),
            ToolResult::Failure {
                error_kind, message, ..
            } => Err(WireError::new(error_kind, message)),
        }
    }

    async fn run_remote_with_retries(
        &self,
        step: &Step,
        dependencies: &HashSet<String>,
    ) -> Result<serde_json::Value, WireError> {
        let mut excluded = HashSet::new();
        let mut attempts = 0u32;
        let timeout = self
            .tools
            .get(&step.tool_name)
            .map(|t| t.timeout())
            .unwrap_or(std::time::Duration::from_secs(30));

        loop {
            let node_id = match self.nodes.choose_node(dependencies, &excluded) {
                Ok(id) => id,
                Err(_) => {
                    return Err(WireError::new(
                        ErrorKind::DependencyUnavailable,
                        format!("no healthy node satisfies {:?}", dependencies),
                    ))
                }
            };

            let result = self
                .remote
                .dispatch(&node_id, &step.tool_name, step.args.clone(), timeout)
                .await;

            match result {
                Ok(data) => {
                    self.nodes.record_outcome(&node_id, true);
                    return Ok(data);
                }
                Err(fault) => {
                    self.nodes.record_outcome(&node_id, false);
                    warn!(node_id, tool = %step.tool_name, kind = ?fault.kind, "remote dispatch failed");
                    if !fault.kind.is_remote_fault() || attempts >= self.config.max_retries {
                        return Err(WireError::new(fault.kind, fault.message));
                    }
                    excluded.insert(node_id);
                    attempts += 1;
                }
            }
        }
    }

    /// After a plan completes, polls for a learning trigger and — if one
    /// fires — dispatches `start_federated_training` in the background.
    /// At most one round per topic runs concurrently; the engine itself
    /// enforces that via its in-flight flag and cooldown.
    fn maybe_schedule_learning(&self) {
        let Some(trigger) = self.metacog.poll() else {
            return;
        };

        self.broker.publish(
            EventType::LearningStarted,
            serde_json::json!({ "topic": trigger.topic, "rounds": trigger.rounds }),
            EventType::LearningStarted.default_priority(),
        );

        let tools = self.tools.clone();
        let metacog = self.metacog.clone();
        let broker = self.broker.clone();
        let topic = trigger.topic.clone();
        let failure_reason = trigger.failure_reason.clone();
        let rounds = trigger.rounds;

        tokio::spawn(async move {
            let result = tools
                .execute(
                    "start_federated_training",
                    serde_json::json!({ "rounds": rounds, "topic": topic }),
                )
                .await;

            let delta_confidence = match &result {
                ToolResult::Success { data, .. } => data
                    .get("delta_confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                ToolResult::Failure { .. } => 0.0,
            };

            info!(topic, delta_confidence, "learning round finished");
            metacog.on_learning_complete(&topic, delta_confidence, &failure_reason);

            broker.publish(
                EventType::LearningCompleted,
                serde_json::json!({ "topic": topic, "delta_confidence": delta_confidence }),
                EventType::LearningCompleted.default_priority(),
            );
        });
    }
}
