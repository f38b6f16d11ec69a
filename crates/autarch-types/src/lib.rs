//! autarch-types: shared data model, layered configuration, and the
//! wire-level error taxonomy used across every Chimera Autarch component.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;

pub use config::{
    AutarchConfig, ControlPlaneConfig, EventsConfig, IntentConfig, LoggingConfig,
    MetacognitiveConfig, NodesConfig, PersistenceConfig,
};
pub use error::{ErrorKind, WireError};
pub use event::{Event, EventType, TypeFilter};
pub use ids::random_id;
pub use model::{
    EvolutionRecord, FailurePattern, LearningTrigger, ModelVersion, NodeRecord, NodeStatus,
    Outcome, Plan, Step, ToolMetricEvent, ToolMetrics,
};
