use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid maintenance state: {0}")]
    InvalidState(String),

    #[error("invalid profile data annotation: {0}")]
    InvalidData(#[from] serde_json::Error),

    #[error("invalid node name: {0}")]
    InvalidNodeName(String),
}
