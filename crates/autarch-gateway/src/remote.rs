//! Implements the orchestrator's `RemoteDispatcher` seam over the live
//! node connection table: serialize a `dispatch` frame, send it down the
//! node's socket, and await the matching `result` frame through a
//! one-shot channel keyed by task id.

use crate::core::Core;
use crate::messages::OutboundMessage;
use async_trait::async_trait;
use autarch_orchestrator::RemoteDispatcher;
use autarch_tools::ToolFault;
use autarch_types::{random_id, ErrorKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct WsRemoteDispatcher {
    pub core: Arc<Core>,
}

#[async_trait]
impl RemoteDispatcher for WsRemoteDispatcher {
    async fn dispatch(
        &self,
        node_id: &str,
        tool_name: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ToolFault> {
        let sender = match self.core.node_senders.get(node_id) {
            Some(s) => s.clone(),
            None => {
                return Err(ToolFault::new(
                    ErrorKind::RemoteCrashed,
                    format!("node '{node_id}' has no live connection"),
                ))
            }
        };

        let task_id = random_id();
        let (tx, rx) = oneshot::channel();
        self.core.pending_results.insert(task_id.clone(), tx);

        let frame = OutboundMessage::Dispatch {
            task_id: task_id.clone(),
            tool: tool_name.to_string(),
            args,
            deadline: Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default(),
        };
        let text = serde_json::to_string(&frame).expect("OutboundMessage always serializes");
        if sender.send(text).is_err() {
            self.core.pending_results.remove(&task_id);
            return Err(ToolFault::new(
                ErrorKind::RemoteCrashed,
                format!("node '{node_id}' connection closed before dispatch"),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.core.pending_results.remove(&task_id);
                Err(ToolFault::new(
                    ErrorKind::RemoteCrashed,
                    format!("node '{node_id}' disconnected mid-call"),
                ))
            }
            Err(_) => {
                self.core.pending_results.remove(&task_id);
                Err(ToolFault::new(
                    ErrorKind::Timeout,
                    format!("node '{node_id}' did not reply within {:?}", timeout),
                ))
            }
        }
    }
}
