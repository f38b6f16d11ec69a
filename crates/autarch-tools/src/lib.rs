//! Tool Registry & Dispatcher (spec §4.C): name-to-Tool mapping and timed
//! invocation with success/failure classification and metric emission.

pub mod builtins;
pub mod error;
pub mod tool;

pub use builtins::{AnalyzeAndPatchTool, FederatedTrainingTool, InitializeSymbioticLinkTool};
pub use error::ToolRegistryError;
pub use tool::{EchoTool, Tool, ToolFault};

use autarch_broker::EventBroker;
use autarch_persistence::PersistenceStore;
use autarch_types::{ErrorKind, EventType, ToolMetricEvent, ToolMetrics};
use dashmap::DashMap;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of [`ToolRegistry::execute`] (spec §4.C `ToolResult`).
#[derive(Debug, Clone)]
pub enum ToolResult {
    Success {
        data: serde_json::Value,
        latency_seconds: f64,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
        latency_seconds: f64,
    },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolResult::Failure { error_kind, .. } => Some(*error_kind),
            ToolResult::Success { .. } => None,
        }
    }
}

pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    metrics: DashMap<String, ToolMetrics>,
    broker: Arc<EventBroker>,
    persistence: Arc<PersistenceStore>,
}

impl ToolRegistry {
    pub fn new(broker: Arc<EventBroker>, persistence: Arc<PersistenceStore>) -> Self {
        Self {
            tools: DashMap::new(),
            metrics: DashMap::new(),
            broker,
            persistence,
        }
    }

    /// Registers a tool by name. Re-registering an existing name is
    /// rejected with `ProtocolError` rather than silently replacing it —
    /// the source was ambiguous here (spec §9); reject makes a stuck
    /// registration visible instead of masking a naming collision.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolRegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolRegistryError::ProtocolError(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.tools.insert(name.clone(), tool);
        self.metrics.insert(name.clone(), ToolMetrics::default());
        info!(tool = %name, "tool registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.clone())
    }

    pub fn metrics_for(&self, name: &str) -> Option<ToolMetrics> {
        self.metrics.get(name).map(|e| e.clone())
    }

    /// Runs `name(args)` with the tool's configured timeout, classifies the
    /// outcome, updates running metrics, and emits a `tool_executed` event
    /// plus a durable `ToolMetricEvent` — unconditionally, including on the
    /// unknown-tool path being the sole exception (no metric for a lookup
    /// miss, per spec §4.C step 1).
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> ToolResult {
        let tool = match self.get(name) {
            Some(t) => t,
            None => {
                return ToolResult::Failure {
                    error_kind: ErrorKind::UnknownTool,
                    message: format!("no tool named '{name}'"),
                    latency_seconds: 0.0,
                };
            }
        };

        let started = Instant::now();
        let timeout = tool.timeout();
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(tool.execute(args)).catch_unwind(),
        )
        .await;
        let latency_seconds = started.elapsed().as_secs_f64();

        let result = match outcome {
            Err(_) => ToolResult::Failure {
                error_kind: ErrorKind::Timeout,
                message: format!("tool '{name}' exceeded {:?} timeout", timeout),
                latency_seconds,
            },
            Ok(Err(_panic)) => ToolResult::Failure {
                error_kind: ErrorKind::ExecutionError,
                message: format!("tool '{name}' panicked"),
                latency_seconds,
            },
            Ok(Ok(Err(fault))) => ToolResult::Failure {
                error_kind: fault.kind,
                message: fault.message,
                latency_seconds,
            },
            Ok(Ok(Ok(data))) => ToolResult::Success {
                data,
                latency_seconds,
            },
        };

        self.update_metrics(name, &result);
        self.emit(name, &result);
        result
    }

    fn update_metrics(&self, name: &str, result: &ToolResult) {
        if let Some(mut metrics) = self.metrics.get_mut(name) {
            match result {
                ToolResult::Success { latency_seconds, .. } => {
                    metrics.record_success(*latency_seconds);
                }
                ToolResult::Failure {
                    latency_seconds,
                    message,
                    ..
                } => {
                    metrics.record_failure(*latency_seconds, message.clone());
                }
            }
        } else {
            warn!(tool = name, "metrics update for unregistered tool skipped");
        }
    }

    fn emit(&self, name: &str, result: &ToolResult) {
        let (success, latency_seconds) = match result {
            ToolResult::Success { latency_seconds, .. } => (true, *latency_seconds),
            ToolResult::Failure { latency_seconds, .. } => (false, *latency_seconds),
        };

        self.persistence.record_tool_metric(ToolMetricEvent {
            tool_name: name.to_string(),
            timestamp: chrono::Utc::now(),
            success,
            latency_seconds,
            context: serde_json::json!({}),
        });

        self.broker.publish(
            EventType::ToolExecuted,
            serde_json::json!({ "tool": name, "success": success, "latency_seconds": latency_seconds }),
            EventType::ToolExecuted.default_priority(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolFault> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolFault> {
            Err(ToolFault::new(ErrorKind::ExecutionError, "simulated failure"))
        }
    }

    fn test_registry() -> (ToolRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(EventBroker::new(64, 100));
        let persistence = Arc::new(PersistenceStore::open_path(dir.path().join("db"), 64).unwrap());
        (ToolRegistry::new(broker, persistence), dir)
    }

    #[tokio::test]
    async fn unknown_tool_returns_failure_without_metric() {
        let (registry, _dir) = test_registry();
        let result = registry.execute("nope", serde_json::json!({})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownTool));
        assert!(registry.metrics_for("nope").is_none());
    }

    #[tokio::test]
    async fn echo_tool_roundtrips_args() {
        let (registry, _dir) = test_registry();
        registry.register(Arc::new(EchoTool)).unwrap();
        let result = registry
            .execute("echo", serde_json::json!({"hello": "world"}))
            .await;
        match result {
            ToolResult::Success { data, .. } => assert_eq!(data, serde_json::json!({"hello": "world"})),
            ToolResult::Failure { .. } => panic!("expected success"),
        }
        let metrics = registry.metrics_for("echo").unwrap();
        assert_eq!(metrics.success_count, 1);
    }

    #[tokio::test]
    async fn re_registering_same_name_is_rejected() {
        let (registry, _dir) = test_registry();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolRegistryError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let (registry, _dir) = test_registry();
        registry.register(Arc::new(SlowTool)).unwrap();
        let result = registry.execute("slow", serde_json::json!({})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn failure_updates_running_metrics() {
        let (registry, _dir) = test_registry();
        registry.register(Arc::new(FailingTool)).unwrap();
        let result = registry.execute("failing", serde_json::json!({})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionError));
        let metrics = registry.metrics_for("failing").unwrap();
        assert_eq!(metrics.failure_count, 1);
        assert!(metrics.last_error.is_some());
    }
}
