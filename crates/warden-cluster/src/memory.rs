use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use warden_domain::{Lease, Node, NodeName, Pod};

use crate::client::{ClusterClient, EventRecord, EvictionStyle, NodePatch};
use crate::error::ClusterError;

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    pods: Vec<Pod>,
    leases: BTreeMap<(String, String), Lease>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    events: Vec<EventRecord>,
    server_version: String,
    blocked_evictions: Vec<(String, String)>,
    patch_count: u64,
    lease_revision: u64,
}

/// In-memory implementation of [`ClusterClient`].
///
/// All data is lost on process exit. Backs the test suites of every crate
/// that drives the cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_node(&self, node: Node) {
        let mut guard = self.inner.write().await;
        guard.nodes.insert(node.name.0.clone(), node);
    }

    pub async fn insert_pod(&self, pod: Pod) {
        let mut guard = self.inner.write().await;
        guard.pods.push(pod);
    }

    pub async fn remove_node(&self, name: &NodeName) {
        let mut guard = self.inner.write().await;
        guard.nodes.remove(name.as_str());
    }

    pub async fn set_server_version(&self, version: impl Into<String>) {
        let mut guard = self.inner.write().await;
        guard.server_version = version.into();
    }

    pub async fn insert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) {
        let mut guard = self.inner.write().await;
        guard
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Make evictions for this pod fail with 429 until unblocked, simulating
    /// a pod disruption budget.
    pub async fn block_eviction(&self, namespace: &str, name: &str) {
        let mut guard = self.inner.write().await;
        guard
            .blocked_evictions
            .push((namespace.to_string(), name.to_string()));
    }

    pub async fn mark_pod_terminating(&self, namespace: &str, name: &str) {
        let mut guard = self.inner.write().await;
        if let Some(pod) = guard
            .pods
            .iter_mut()
            .find(|p| p.namespace == namespace && p.name == name)
        {
            pod.deletion_timestamp = Some(Utc::now());
        }
    }

    pub async fn events(&self) -> Vec<EventRecord> {
        self.inner.read().await.events.clone()
    }

    pub async fn patch_count(&self) -> u64 {
        self.inner.read().await.patch_count
    }

    pub async fn pods(&self) -> Vec<Pod> {
        self.inner.read().await.pods.clone()
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_node(&self, name: &NodeName) -> Result<Option<Node>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard.nodes.get(name.as_str()).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard.nodes.values().cloned().collect())
    }

    async fn patch_node(&self, name: &NodeName, patch: &NodePatch) -> Result<(), ClusterError> {
        let mut guard = self.inner.write().await;
        guard.patch_count += 1;
        let node = guard
            .nodes
            .get_mut(name.as_str())
            .ok_or_else(|| ClusterError::NodeNotFound(name.to_string()))?;
        for (key, value) in &patch.labels {
            match value {
                Some(v) => {
                    node.labels.insert(key.clone(), v.clone());
                }
                None => {
                    node.labels.remove(key);
                }
            }
        }
        for (key, value) in &patch.annotations {
            match value {
                Some(v) => {
                    node.annotations.insert(key.clone(), v.clone());
                }
                None => {
                    node.annotations.remove(key);
                }
            }
        }
        if let Some(unschedulable) = patch.unschedulable {
            node.unschedulable = unschedulable;
        }
        Ok(())
    }

    async fn delete_node(&self, name: &NodeName) -> Result<(), ClusterError> {
        let mut guard = self.inner.write().await;
        guard.nodes.remove(name.as_str());
        guard
            .pods
            .retain(|p| p.node_name.as_ref() != Some(name));
        Ok(())
    }

    async fn list_pods_on_node(&self, node: &NodeName) -> Result<Vec<Pod>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard
            .pods
            .iter()
            .filter(|p| p.node_name.as_ref() == Some(node))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard
            .pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned())
    }

    async fn evict_pod(
        &self,
        pod: &Pod,
        _grace_period: Option<i64>,
        _style: EvictionStyle,
    ) -> Result<(), ClusterError> {
        let mut guard = self.inner.write().await;
        if guard
            .blocked_evictions
            .iter()
            .any(|(ns, n)| ns == &pod.namespace && n == &pod.name)
        {
            return Err(ClusterError::TooManyRequests(
                pod.namespace.clone(),
                pod.name.clone(),
            ));
        }
        guard
            .pods
            .retain(|p| !(p.namespace == pod.namespace && p.name == pod.name));
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod, _grace_period: Option<i64>) -> Result<(), ClusterError> {
        let mut guard = self.inner.write().await;
        guard
            .pods
            .retain(|p| !(p.namespace == pod.namespace && p.name == pod.name));
        Ok(())
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        let guard = self.inner.read().await;
        if guard.server_version.is_empty() {
            Ok("1.24.0".to_string())
        } else {
            Ok(guard.server_version.clone())
        }
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_lease(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Lease>, ClusterError> {
        let guard = self.inner.read().await;
        Ok(guard
            .leases
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_lease(&self, lease: &Lease) -> Result<Lease, ClusterError> {
        let mut guard = self.inner.write().await;
        let key = (lease.namespace.clone(), lease.name.clone());
        if guard.leases.contains_key(&key) {
            return Err(ClusterError::Conflict(lease.name.clone()));
        }
        guard.lease_revision += 1;
        let mut stored = lease.clone();
        stored.resource_version = guard.lease_revision.to_string();
        guard.leases.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_lease(&self, lease: &Lease) -> Result<Lease, ClusterError> {
        let mut guard = self.inner.write().await;
        guard.lease_revision += 1;
        let revision = guard.lease_revision;
        let key = (lease.namespace.clone(), lease.name.clone());
        let stored = guard
            .leases
            .get_mut(&key)
            .ok_or_else(|| ClusterError::LeaseNotFound(lease.namespace.clone(), lease.name.clone()))?;
        if stored.resource_version != lease.resource_version {
            return Err(ClusterError::Conflict(lease.name.clone()));
        }
        stored.holder = lease.holder.clone();
        stored.renew_time = lease.renew_time;
        stored.resource_version = revision.to_string();
        Ok(stored.clone())
    }

    async fn emit_event(
        &self,
        node: &NodeName,
        reason: &str,
        message: &str,
    ) -> Result<(), ClusterError> {
        let mut guard = self.inner.write().await;
        guard.events.push(EventRecord {
            node: node.clone(),
            reason: reason.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}
