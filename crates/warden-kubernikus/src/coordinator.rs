use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use warden_cluster::{ensure_drain, ClusterClient, DrainParams, NodePatch};
use warden_config::{
    load_kubernikus_config, KubernikusConfig, OpenStackCredentials,
};
use warden_domain::{Node, DELETE_NODE_LABEL, KUBELET_UPDATE_LABEL};

use crate::error::KubernikusError;
use crate::openstack::CloudApi;

const CLOUD_PROVIDER_CONF: &str = "./provider/cloudprovider.conf";

/// Marks nodes whose kubelet lags the API server and replaces nodes opted
/// into deletion: drain, delete the backing OpenStack server, delete the
/// node object so the cloud provider brings up a fresh one.
pub struct KubernikusCoordinator {
    client: Arc<dyn ClusterClient>,
    cloud: Arc<dyn CloudApi>,
    config_path: PathBuf,
}

/// OpenStack credentials from the configured cluster secret, or from the
/// cloud provider conf file when no secret is configured.
pub async fn resolve_credentials(
    client: &Arc<dyn ClusterClient>,
    config: &KubernikusConfig,
) -> Result<OpenStackCredentials, KubernikusError> {
    match &config.cloud_provider_secret {
        Some(secret_ref) => {
            let data = client
                .get_secret(&secret_ref.namespace, &secret_ref.name)
                .await?
                .ok_or(KubernikusError::MissingCredentials)?;
            OpenStackCredentials::from_map(&data, &secret_ref.name).map_err(Into::into)
        }
        None => {
            let content = std::fs::read_to_string(Path::new(CLOUD_PROVIDER_CONF))
                .map_err(|_| KubernikusError::MissingCredentials)?;
            OpenStackCredentials::from_conf(&content, CLOUD_PROVIDER_CONF).map_err(Into::into)
        }
    }
}

impl KubernikusCoordinator {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        cloud: Arc<dyn CloudApi>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        KubernikusCoordinator {
            client,
            cloud,
            config_path: config_path.into(),
        }
    }

    pub async fn run(self, is_leader: Arc<AtomicBool>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let period = match load_kubernikus_config(&self.config_path) {
                Ok(config) => config.intervals.check,
                Err(e) => {
                    warn!(error = %e, "kubernikus config unreadable, using fallback period");
                    std::time::Duration::from_secs(120)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => return,
            }
            if !is_leader.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "kubernikus cycle failed");
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<(), KubernikusError> {
        let config = load_kubernikus_config(&self.config_path)?;
        let server_version = self.client.server_version().await?;

        for node in self.client.list_nodes().await? {
            self.label_kubelet_update(&node, &server_version).await;

            if node.label(DELETE_NODE_LABEL) == Some("true") {
                if let Err(e) = self.replace_node(&config, &node).await {
                    warn!(node = %node.name, error = %e, "node replacement failed");
                }
            }
        }
        Ok(())
    }

    async fn label_kubelet_update(&self, node: &Node, server_version: &str) {
        let kubelet = node.kubelet_version.trim_start_matches('v');
        let server = server_version.trim_start_matches('v');
        let needs_update = !kubelet.is_empty() && kubelet != server;
        let value = if needs_update { "true" } else { "false" };
        if node.label(KUBELET_UPDATE_LABEL) == Some(value) {
            return;
        }
        let patch = NodePatch::new().set_label(KUBELET_UPDATE_LABEL, value);
        if let Err(e) = self.client.patch_node(&node.name, &patch).await {
            warn!(node = %node.name, error = %e, "kubelet label patch failed");
        }
    }

    async fn replace_node(
        &self,
        config: &KubernikusConfig,
        node: &Node,
    ) -> Result<(), KubernikusError> {
        if !node.unschedulable {
            let patch = NodePatch::new().unschedulable(true);
            self.client.patch_node(&node.name, &patch).await?;
        }

        let params = DrainParams {
            eviction_period: config.intervals.pod_eviction.period,
            eviction_timeout: config.intervals.pod_eviction.timeout,
            force_eviction: config.intervals.pod_eviction.force,
            deletion_period: config.intervals.pod_deletion.period,
            deletion_timeout: config.intervals.pod_deletion.timeout,
            grace_period: None,
        };
        let drained = ensure_drain(&self.client, &node.name, &params).await?;
        if !drained {
            info!(node = %node.name, "still draining, retrying next cycle");
            return Ok(());
        }

        for server in self.cloud.list_servers(node.name.as_str()).await? {
            info!(node = %node.name, server = %server.id, "deleting backing server");
            self.cloud.delete_server(&server.id).await?;
        }
        self.client.delete_node(&node.name).await?;
        info!(node = %node.name, "node deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openstack::Server;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;
    use warden_cluster::InMemoryCluster;
    use warden_domain::NodeName;

    fn kubernikus_config() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
intervals:
  check: 2m
  podDeletion:
    period: 5ms
    timeout: 100ms
  podEviction:
    period: 5ms
    timeout: 50ms
    force: true
"#,
        )
        .unwrap();
        file
    }

    #[derive(Default)]
    struct MockCloud {
        servers: Mutex<Vec<Server>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudApi for MockCloud {
        async fn list_servers(&self, name: &str) -> Result<Vec<Server>, KubernikusError> {
            Ok(self
                .servers
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.name == name)
                .cloned()
                .collect())
        }

        async fn delete_server(&self, id: &str) -> Result<(), KubernikusError> {
            self.deleted.lock().unwrap().push(id.to_string());
            self.servers.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn kubelet_version_mismatch_is_labeled() {
        let config = kubernikus_config();
        let cluster = InMemoryCluster::new();
        cluster.set_server_version("1.24.3").await;

        let mut stale = Node::new("stale");
        stale.kubelet_version = "v1.23.5".into();
        cluster.insert_node(stale).await;
        let mut fresh = Node::new("fresh");
        fresh.kubelet_version = "v1.24.3".into();
        cluster.insert_node(fresh).await;

        let coordinator = KubernikusCoordinator::new(
            Arc::new(cluster.clone()),
            Arc::new(MockCloud::default()),
            config.path(),
        );
        coordinator.run_cycle().await.unwrap();

        let stale = cluster.get_node(&NodeName::new("stale")).await.unwrap().unwrap();
        assert_eq!(stale.label(KUBELET_UPDATE_LABEL), Some("true"));
        let fresh = cluster.get_node(&NodeName::new("fresh")).await.unwrap().unwrap();
        assert_eq!(fresh.label(KUBELET_UPDATE_LABEL), Some("false"));
    }

    #[tokio::test]
    async fn delete_node_label_replaces_the_node() {
        let config = kubernikus_config();
        let cluster = InMemoryCluster::new();
        let mut node = Node::new("doomed");
        node.labels.insert(DELETE_NODE_LABEL.into(), "true".into());
        cluster.insert_node(node).await;

        let cloud = Arc::new(MockCloud::default());
        cloud.servers.lock().unwrap().push(Server {
            id: "srv-9".into(),
            name: "doomed".into(),
        });

        let coordinator = KubernikusCoordinator::new(
            Arc::new(cluster.clone()),
            cloud.clone(),
            config.path(),
        );
        coordinator.run_cycle().await.unwrap();

        assert_eq!(cloud.deleted.lock().unwrap().as_slice(), ["srv-9"]);
        assert!(cluster.get_node(&NodeName::new("doomed")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nodes_without_the_label_are_kept() {
        let config = kubernikus_config();
        let cluster = InMemoryCluster::new();
        cluster.insert_node(Node::new("keeper")).await;

        let cloud = Arc::new(MockCloud::default());
        let coordinator =
            KubernikusCoordinator::new(Arc::new(cluster.clone()), cloud.clone(), config.path());
        coordinator.run_cycle().await.unwrap();

        assert!(cloud.deleted.lock().unwrap().is_empty());
        assert!(cluster.get_node(&NodeName::new("keeper")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn credentials_resolve_from_secret() {
        let cluster = InMemoryCluster::new();
        cluster
            .insert_secret(
                "kube-system",
                "cloud-creds",
                [
                    ("auth-url", "https://keystone.example.net/v3"),
                    ("username", "maintenance"),
                    ("password", "hunter2"),
                    ("region", "qa-de-1"),
                    ("domain-name", "svc"),
                    ("tenant-id", "tenant"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            )
            .await;

        let config: KubernikusConfig = serde_yaml::from_str(
            r#"
intervals:
  check: 2m
  podDeletion: {period: 5s, timeout: 1m}
  podEviction: {period: 5s, timeout: 1m}
cloudProviderSecret:
  name: cloud-creds
  namespace: kube-system
"#,
        )
        .unwrap();

        let client: Arc<dyn ClusterClient> = Arc::new(cluster);
        let creds = resolve_credentials(&client, &config).await.unwrap();
        assert_eq!(creds.username, "maintenance");
        assert_eq!(creds.region, "qa-de-1");
    }
}
