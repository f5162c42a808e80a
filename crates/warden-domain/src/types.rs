use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(s: impl Into<String>) -> Self {
        NodeName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileName(pub String);

impl ProfileName {
    pub fn new(s: impl Into<String>) -> Self {
        ProfileName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Maintenance state ────────────────────────────────────────────────────────

/// Per-profile maintenance state of a node.
///
/// Transitions:
///   operational → maintenance-required → in-maintenance → operational
///
/// Any other edge is legal when a profile configures it; the default cycle
/// above is what the shipped profiles use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaintenanceState {
    #[default]
    #[serde(rename = "operational")]
    Operational,
    #[serde(rename = "maintenance-required")]
    MaintenanceRequired,
    #[serde(rename = "in-maintenance")]
    InMaintenance,
}

impl std::fmt::Display for MaintenanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MaintenanceState::Operational => "operational",
            MaintenanceState::MaintenanceRequired => "maintenance-required",
            MaintenanceState::InMaintenance => "in-maintenance",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MaintenanceState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operational" => Ok(MaintenanceState::Operational),
            "maintenance-required" => Ok(MaintenanceState::MaintenanceRequired),
            "in-maintenance" => Ok(MaintenanceState::InMaintenance),
            other => Err(DomainError::InvalidState(other.to_string())),
        }
    }
}

// ── Cluster objects ──────────────────────────────────────────────────────────

/// A worker node as the decision engine sees it. Built from the cluster API
/// object; labels and annotations are the durable state the controller owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub kubelet_version: String,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: NodeName::new(name),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            unschedulable: false,
            kubelet_version: String::new(),
            conditions: Vec::new(),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.label(key) == Some(value)
    }

    /// Profiles selected by the profile label, in label order.
    /// A node without the label gets the default profile.
    pub fn profiles(&self) -> Vec<ProfileName> {
        let raw = self.label(crate::constants::PROFILE_LABEL).unwrap_or("");
        let names: Vec<ProfileName> = raw
            .split(crate::constants::PROFILE_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ProfileName::new)
            .collect();
        if names.is_empty() {
            vec![ProfileName::new(crate::constants::DEFAULT_PROFILE)]
        } else {
            names
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

/// Owning workload of a pod, with the replica count resolved where possible.
/// Used by drain filtering and the shuffle metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub node_name: Option<NodeName>,
    pub ip: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub owner: Option<OwnerRef>,
}

impl Pod {
    /// Static mirror pods live on the node itself; evicting them is futile.
    pub fn is_mirror(&self) -> bool {
        self.annotations
            .contains_key(crate::constants::MIRROR_POD_ANNOTATION)
    }

    pub fn owned_by_daemonset(&self) -> bool {
        self.owner
            .as_ref()
            .map(|o| o.kind == "DaemonSet")
            .unwrap_or(false)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// `namespace/kind/name` of the owning workload, or `namespace/Pod/name`
    /// for unowned pods. Metric label value.
    pub fn owner_key(&self) -> String {
        match &self.owner {
            Some(o) => format!("{}/{}/{}", self.namespace, o.kind, o.name),
            None => format!("{}/Pod/{}", self.namespace, self.name),
        }
    }
}

/// Cluster-scoped coordination lease. The only cross-process shared state;
/// every write is a compare-and-set on `resource_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub namespace: String,
    pub name: String,
    pub holder: Option<String>,
    pub renew_time: Option<DateTime<Utc>>,
    pub resource_version: String,
}

impl Lease {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Lease {
            namespace: namespace.into(),
            name: name.into(),
            holder: None,
            renew_time: None,
            resource_version: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PROFILE_LABEL, STATE_LABEL};

    #[test]
    fn maintenance_state_round_trips_through_display() {
        for state in [
            MaintenanceState::Operational,
            MaintenanceState::MaintenanceRequired,
            MaintenanceState::InMaintenance,
        ] {
            let parsed: MaintenanceState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn maintenance_state_rejects_unknown() {
        assert!("resting".parse::<MaintenanceState>().is_err());
    }

    #[test]
    fn profiles_split_on_double_dash() {
        let mut node = Node::new("n1");
        node.labels
            .insert(PROFILE_LABEL.into(), "flatcar--kubelet".into());
        let profiles = node.profiles();
        assert_eq!(
            profiles,
            vec![ProfileName::new("flatcar"), ProfileName::new("kubelet")]
        );
    }

    #[test]
    fn missing_profile_label_yields_default() {
        let node = Node::new("n1");
        assert_eq!(node.profiles(), vec![ProfileName::new("default")]);
    }

    #[test]
    fn empty_profile_label_yields_default() {
        let mut node = Node::new("n1");
        node.labels.insert(PROFILE_LABEL.into(), "".into());
        assert_eq!(node.profiles(), vec![ProfileName::new("default")]);
    }

    #[test]
    fn mirror_and_daemonset_pods_are_detected() {
        let mut pod = Pod {
            namespace: "kube-system".into(),
            name: "static-web".into(),
            uid: "u1".into(),
            node_name: Some(NodeName::new("n1")),
            ip: None,
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
            owner: None,
        };
        assert!(!pod.is_mirror());
        pod.annotations
            .insert(crate::constants::MIRROR_POD_ANNOTATION.into(), "hash".into());
        assert!(pod.is_mirror());

        pod.owner = Some(OwnerRef {
            kind: "DaemonSet".into(),
            name: "fluentd".into(),
            replicas: None,
        });
        assert!(pod.owned_by_daemonset());
    }

    #[test]
    fn has_label_compares_values() {
        let mut node = Node::new("n1");
        node.labels.insert(STATE_LABEL.into(), "operational".into());
        assert!(node.has_label(STATE_LABEL, "operational"));
        assert!(!node.has_label(STATE_LABEL, "in-maintenance"));
    }
}
