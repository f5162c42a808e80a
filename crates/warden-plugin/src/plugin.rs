use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_cluster::ClusterClient;
use warden_domain::{MaintenanceState, Node, ProfileName};

use crate::error::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Check,
    Notify,
    Trigger,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Check => write!(f, "check"),
            PluginKind::Notify => write!(f, "notify"),
            PluginKind::Trigger => write!(f, "trigger"),
        }
    }
}

/// Everything a plugin may look at during one evaluation. Instances are
/// shared read-only across reconciliations; state that must survive a cycle
/// belongs on the node or in a lease, never inside a plugin.
#[derive(Clone)]
pub struct PluginParams {
    pub node: Node,
    pub profile: ProfileName,
    pub state: MaintenanceState,
    pub client: Arc<dyn ClusterClient>,
    pub now: DateTime<Utc>,
    pub log_details: bool,
}

/// Outcome of one check invocation; `info` surfaces in the NodeInfo snapshot.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub passed: bool,
    pub info: BTreeMap<String, String>,
}

impl CheckResult {
    pub fn passed() -> Self {
        CheckResult {
            passed: true,
            info: BTreeMap::new(),
        }
    }

    pub fn failed() -> Self {
        CheckResult {
            passed: false,
            info: BTreeMap::new(),
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait CheckPlugin: Send + Sync {
    /// Plugin type, shown as `id` in the snapshot.
    fn id(&self) -> &'static str;

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError>;

    /// Called once when a transition guarded by this instance fires. Hook for
    /// one-shot side effects like counter resets; default is a no-op.
    async fn on_transition(&self, _params: &PluginParams) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
pub trait NotifyPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    async fn notify(&self, params: &PluginParams) -> Result<(), PluginError>;
}

#[async_trait]
pub trait TriggerPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    async fn trigger(&self, params: &PluginParams) -> Result<(), PluginError>;
}
