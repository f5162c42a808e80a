use std::collections::BTreeMap;

use warden_domain::{Node, FAILURE_DOMAIN_LABEL, HOST_LABEL};

/// A physical host and the nodes whose VMs it backs, derived from labels
/// each cycle. A host only groups nodes that share both the host and the
/// failure-domain label.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub availability_zone: String,
    pub nodes: Vec<Node>,
}

/// Maintenance state of a host. `in` and `alarm` both permit shutting down
/// the host's VMs; `alarm` additionally force-deletes pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMaintenance {
    NotRequired,
    InMaintenance,
    Alarm,
    Unknown,
}

impl HostMaintenance {
    pub fn shutdown_permitted(&self) -> bool {
        matches!(
            self,
            HostMaintenance::InMaintenance | HostMaintenance::Alarm
        )
    }

    /// Value written to the `esx-in-maintenance` label.
    pub fn label_value(&self) -> &'static str {
        match self {
            HostMaintenance::NotRequired => "false",
            HostMaintenance::InMaintenance => "true",
            HostMaintenance::Alarm => "alarm",
            HostMaintenance::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HostMaintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label_value())
    }
}

/// Group nodes into hosts. Nodes missing either label are skipped; the
/// availability zone is the last character of the failure domain.
pub fn group_hosts(nodes: Vec<Node>) -> Vec<Host> {
    let mut groups: BTreeMap<(String, String), Vec<Node>> = BTreeMap::new();
    for node in nodes {
        let host = match node.label(HOST_LABEL) {
            Some(host) => host.to_string(),
            None => continue,
        };
        let zone = match node
            .label(FAILURE_DOMAIN_LABEL)
            .and_then(|domain| domain.chars().last())
        {
            Some(zone) => zone.to_string(),
            None => continue,
        };
        groups.entry((host, zone)).or_default().push(node);
    }
    groups
        .into_iter()
        .map(|((name, availability_zone), nodes)| Host {
            name,
            availability_zone,
            nodes,
        })
        .collect()
}
