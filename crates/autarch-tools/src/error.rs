use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("protocol error: {0}")]
    ProtocolError(String),
}
