//! Intent Compiler & Orchestrator (spec §4.F): the only component that
//! talks to clients; compiles intents into Plans and drives the other
//! four components through them.

pub mod compiler;
pub mod dispatch;
pub mod orchestrator;

pub use compiler::IntentCompiler;
pub use dispatch::RemoteDispatcher;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
