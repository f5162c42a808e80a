use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_domain::{Lease, Node, NodeName, Pod};

use crate::error::ClusterError;

/// Which eviction endpoint the API server supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionStyle {
    /// `policy/v1`, API servers ≥ 1.22.
    PolicyV1,
    /// `policy/v1beta1`, API servers ≥ 1.6.
    PolicyV1beta1,
}

/// Desired changes to a node. A `None` value removes the key. Empty patches
/// are skipped by callers, which keeps repeated reconciliations no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
    pub unschedulable: Option<bool>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove_label(mut self, key: impl Into<String>) -> Self {
        self.labels.insert(key.into(), None);
        self
    }

    pub fn set_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove_annotation(mut self, key: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), None);
        self
    }

    pub fn unschedulable(mut self, value: bool) -> Self {
        self.unschedulable = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty() && self.unschedulable.is_none()
    }
}

/// An event emitted on a node object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub node: NodeName,
    pub reason: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Everything the decision engine needs from the cluster API. The engine
/// never talks to the API machinery directly; production binds
/// [`KubeCluster`](crate::kube::KubeCluster), tests bind
/// [`InMemoryCluster`](crate::memory::InMemoryCluster).
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    async fn get_node(&self, name: &NodeName) -> Result<Option<Node>, ClusterError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    /// Merge-patch labels, annotations, and the schedulable flag.
    async fn patch_node(&self, name: &NodeName, patch: &NodePatch) -> Result<(), ClusterError>;

    async fn delete_node(&self, name: &NodeName) -> Result<(), ClusterError>;

    /// Pods bound to the node, via the `spec.nodeName` field index.
    async fn list_pods_on_node(&self, node: &NodeName) -> Result<Vec<Pod>, ClusterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError>;

    async fn evict_pod(
        &self,
        pod: &Pod,
        grace_period: Option<i64>,
        style: EvictionStyle,
    ) -> Result<(), ClusterError>;

    async fn delete_pod(&self, pod: &Pod, grace_period: Option<i64>) -> Result<(), ClusterError>;

    /// API server version, e.g. `"1.24.3"`.
    async fn server_version(&self) -> Result<String, ClusterError>;

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    async fn get_lease(&self, namespace: &str, name: &str)
        -> Result<Option<Lease>, ClusterError>;

    async fn create_lease(&self, lease: &Lease) -> Result<Lease, ClusterError>;

    /// Compare-and-set: the write succeeds only when `lease.resource_version`
    /// still matches the stored one. Losers get [`ClusterError::Conflict`].
    async fn update_lease(&self, lease: &Lease) -> Result<Lease, ClusterError>;

    async fn emit_event(
        &self,
        node: &NodeName,
        reason: &str,
        message: &str,
    ) -> Result<(), ClusterError>;
}
