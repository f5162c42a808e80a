use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MaintenanceState;

/// Snapshot of the latest evaluation for one node, served at `/api/v1/info`.
///
/// Overwritten atomically on each reconciliation; deleted with the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_name: String,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub profiles: Vec<ProfileInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub name: String,
    pub state: MaintenanceState,
    #[serde(default)]
    pub transitions: Vec<TransitionInfo>,
}

/// One evaluated transition. `passed` can be false while the chain passed:
/// that is admission blocking the transition this cycle, or a failed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionInfo {
    pub target: MaintenanceState,
    pub passed: bool,
    pub chain: CheckChainInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckChainInfo {
    pub expression: String,
    pub passed: bool,
    #[serde(default)]
    pub info: BTreeMap<String, CheckInfo>,
}

impl CheckChainInfo {
    /// Result of the empty chain: passes without invoking anything.
    pub fn empty() -> Self {
        CheckChainInfo {
            expression: String::new(),
            passed: true,
            info: BTreeMap::new(),
        }
    }
}

/// Outcome of a single check instance within a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInfo {
    /// Plugin type of the instance.
    pub id: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
