use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("pod not found: {0}/{1}")]
    PodNotFound(String, String),

    #[error("lease not found: {0}/{1}")]
    LeaseNotFound(String, String),

    #[error("conflict updating {0}: resource version changed")]
    Conflict(String),

    #[error("eviction rejected for {0}/{1}: too many requests")]
    TooManyRequests(String, String),

    #[error("cluster api error: {0}")]
    Api(String),

    #[error("unparsable server version: {0}")]
    Version(String),

    #[error("drain failed:\n{0}")]
    Drain(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Compare-and-set losses are expected under contention; callers treat
    /// them as "not this cycle", not as failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    pub fn is_retryable_eviction(&self) -> bool {
        matches!(self, ClusterError::TooManyRequests(_, _))
    }
}
