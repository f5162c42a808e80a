use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubernikusError {
    #[error("config error: {0}")]
    Config(#[from] warden_config::ConfigError),

    #[error("cluster error: {0}")]
    Cluster(#[from] warden_cluster::ClusterError),

    #[error("openstack auth failed: {0}")]
    Auth(String),

    #[error("openstack api error: {0}")]
    Api(String),

    #[error("no openstack credentials available")]
    MissingCredentials,
}
