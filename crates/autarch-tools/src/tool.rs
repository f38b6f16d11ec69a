//! The `Tool` abstraction (spec §9 "Dynamic dispatch of tools"): a uniform
//! interface over `args -> result`, chosen over a closed sum type for
//! plugin-style extensibility, following the teacher's `AgentSkill` trait
//! (`pagi-core/src/orchestrator/mod.rs`).

use async_trait::async_trait;
use autarch_types::ErrorKind;
use std::time::Duration;

/// One recognized tool-execution failure, carrying the kind the wire
/// protocol needs plus a human message.
#[derive(Debug, Clone)]
pub struct ToolFault {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolFault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolFault {}

/// A tool body. `execute` runs with the given JSON args and either returns
/// a JSON result or a classified fault; any panic inside is caught by the
/// dispatcher and classified as `ExecutionError`, not propagated.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str {
        "0.1.0"
    }
    /// Capability/dependency tags this tool needs from a target node; an
    /// empty set means it can always run locally.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolFault>;
}

/// The built-in fallback tool used for unmatched intents (spec §9, resolved
/// to `echo`: see `IntentConfig::default_tool`). Echoes its args back.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolFault> {
        Ok(args)
    }
}
