use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("config error: {0}")]
    Config(#[from] warden_config::ConfigError),

    #[error("plugin error: {0}")]
    Plugin(#[from] warden_plugin::PluginError),

    #[error("cluster error: {0}")]
    Cluster(#[from] warden_cluster::ClusterError),

    #[error("domain error: {0}")]
    Domain(#[from] warden_domain::DomainError),

    /// Joined per-profile errors of one reconciliation. The other profiles
    /// of the node were still processed and persisted.
    #[error("profile errors:\n{0}")]
    Profiles(String),
}
