//! The seam between the orchestrator and a selected remote node. The
//! gateway binary implements this trait over the live node transport; the
//! orchestrator crate stays transport-agnostic, mirroring the teacher's
//! `AgentSkill` boundary (`pagi-core/src/orchestrator/mod.rs`).

use async_trait::async_trait;
use autarch_tools::ToolFault;
use std::time::Duration;

#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        node_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ToolFault>;
}
