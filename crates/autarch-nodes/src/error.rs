use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeRegistryError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("no healthy node satisfies the required capabilities")]
    NoneAvailable,
    #[error("unknown node id")]
    UnknownNode,
}
