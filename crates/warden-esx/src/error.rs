use thiserror::Error;

#[derive(Debug, Error)]
pub enum EsxError {
    #[error("config error: {0}")]
    Config(#[from] warden_config::ConfigError),

    #[error("cluster error: {0}")]
    Cluster(#[from] warden_cluster::ClusterError),

    #[error("no vCenter credentials for availability zone '{0}'")]
    NoCredentials(String),

    #[error("vCenter session error: {0}")]
    Session(String),

    #[error("vCenter api error for '{object}': {message}")]
    Api { object: String, message: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("vm '{0}' did not power off in time")]
    ShutdownTimeout(String),
}
