//! Wire-level error taxonomy shared by every component (spec §7).
//!
//! Components raise their own `thiserror` enums internally; at the one
//! point where a failure crosses the control-plane boundary it is mapped
//! into one of these kinds and serialized as `{kind, message}`.

use serde::{Deserialize, Serialize};

/// The error *kinds* from spec §7. Not a type hierarchy — a flat
/// classification used for client-facing errors, retry policy, and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed frame, missing required field, unknown message type.
    ProtocolError,
    /// Bad signature, replayed nonce, or expired timestamp on node registration.
    AuthFailed,
    /// No tool registered under the requested name.
    UnknownTool,
    /// Tool arguments failed validation.
    InvalidArgs,
    /// Dispatch deadline expired before a result arrived.
    Timeout,
    /// Remote node declined to run the task.
    RemoteRefused,
    /// Remote node's connection dropped mid-task.
    RemoteCrashed,
    /// A capability the plan requires is not available on any healthy node.
    DependencyUnavailable,
    /// Persistence write or read failed.
    StorageUnavailable,
    /// An internal invariant was violated; fatal for the affected task only.
    InternalInvariant,
    /// Tool body raised an error during execution.
    ExecutionError,
}

impl ErrorKind {
    /// Remote-fault kinds are eligible for automatic retry under §4.D.
    pub fn is_remote_fault(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RemoteRefused | ErrorKind::RemoteCrashed
        )
    }
}

/// A structured error as it crosses the client boundary (`{kind, message}`).
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
