use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use warden_domain::{
    Lease, MaintenanceState, ProfileData, ProfileName, DATA_ANNOTATION, STATE_LABEL,
};

use crate::error::PluginError;
use crate::impls::parse_config;
use crate::plugin::{CheckPlugin, CheckResult, PluginParams};

#[derive(Debug, Deserialize)]
struct MaxMaintenanceConfig {
    max: u32,
    /// Count entries of this profile instead of the one being evaluated.
    #[serde(default)]
    profile: Option<String>,
}

/// Cluster-wide cap: passes while fewer than `max` other nodes are
/// `in-maintenance` for the profile. Observes cluster state at call time;
/// safe under concurrent reconciliations because it only reads.
pub struct MaxMaintenanceCheck {
    max: u32,
    profile: Option<ProfileName>,
}

impl MaxMaintenanceCheck {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: MaxMaintenanceConfig = parse_config("maxMaintenance", config)?;
        Ok(MaxMaintenanceCheck {
            max: cfg.max,
            profile: cfg.profile.map(ProfileName::new),
        })
    }
}

#[async_trait]
impl CheckPlugin for MaxMaintenanceCheck {
    fn id(&self) -> &'static str {
        "maxMaintenance"
    }

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError> {
        let profile = self.profile.as_ref().unwrap_or(&params.profile);
        let nodes = params.client.list_nodes().await?;

        let mut count: u32 = 0;
        for node in &nodes {
            if node.name == params.node.name {
                continue;
            }
            let in_maintenance = match ProfileData::parse(node.annotation(DATA_ANNOTATION)) {
                Ok(data) if !data.profiles.is_empty() => data
                    .entry(profile)
                    .map(|e| e.state == MaintenanceState::InMaintenance)
                    .unwrap_or(false),
                // Nodes without a readable record fall back to the state
                // label, which only covers the first profile.
                _ => {
                    node.has_label(STATE_LABEL, "in-maintenance")
                        && node.profiles().contains(profile)
                }
            };
            if in_maintenance {
                count += 1;
            }
        }

        Ok(CheckResult {
            passed: count < self.max,
            info: [
                ("inMaintenance".to_string(), count.to_string()),
                ("max".to_string(), self.max.to_string()),
            ]
            .into(),
        })
    }
}

fn default_namespace() -> String {
    "kube-system".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaggerConfig {
    #[serde(with = "humantime_serde")]
    duration: Duration,
    lease_name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
}

/// Serializes transitions into maintenance through a cluster-wide lease.
///
/// Passes only when the lease's renew time is at least `duration` old AND the
/// compare-and-set takeover succeeds. Losing the CAS is a plain fail, not an
/// error: the next cycle tries again. A local "I won" flag would break under
/// concurrent controllers, so the lease is the only arbiter.
pub struct StaggerCheck {
    duration: Duration,
    lease_name: String,
    namespace: String,
}

impl StaggerCheck {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: StaggerConfig = parse_config("stagger", config)?;
        Ok(StaggerCheck {
            duration: cfg.duration,
            lease_name: cfg.lease_name,
            namespace: cfg.namespace,
        })
    }

    fn identity(&self, params: &PluginParams) -> String {
        format!("{}@{}", params.node.name, params.now.timestamp())
    }
}

#[async_trait]
impl CheckPlugin for StaggerCheck {
    fn id(&self) -> &'static str {
        "stagger"
    }

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError> {
        let existing = params
            .client
            .get_lease(&self.namespace, &self.lease_name)
            .await?;

        let mut lease = match existing {
            None => {
                let mut fresh = Lease::new(&self.namespace, &self.lease_name);
                fresh.holder = Some(self.identity(params));
                fresh.renew_time = Some(params.now);
                return match params.client.create_lease(&fresh).await {
                    Ok(_) => Ok(CheckResult::passed()),
                    Err(e) if e.is_conflict() => {
                        Ok(CheckResult::failed().with_info("reason", "lost lease creation race"))
                    }
                    Err(e) => Err(e.into()),
                };
            }
            Some(lease) => lease,
        };

        let window_open = match (lease.renew_time, chrono::Duration::from_std(self.duration)) {
            (None, _) => true,
            (Some(renewed), Ok(window)) => {
                params.now.signed_duration_since(renewed) >= window
            }
            // A duration too large for chrono never elapses.
            (Some(_), Err(_)) => false,
        };
        if !window_open {
            return Ok(CheckResult::failed()
                .with_info("heldBy", lease.holder.clone().unwrap_or_default()));
        }

        lease.holder = Some(self.identity(params));
        lease.renew_time = Some(params.now);
        match params.client.update_lease(&lease).await {
            Ok(_) => Ok(CheckResult::passed()),
            Err(e) if e.is_conflict() => {
                Ok(CheckResult::failed().with_info("reason", "lost lease update race"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use warden_cluster::{ClusterClient, InMemoryCluster};
    use warden_domain::{Node, ProfileEntry};

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    async fn node_in_maintenance(cluster: &InMemoryCluster, name: &str, profile: &str) {
        let mut node = Node::new(name);
        let mut data = ProfileData::default();
        let mut entry = ProfileEntry::initial(Utc::now());
        entry.state = MaintenanceState::InMaintenance;
        data.profiles.insert(ProfileName::new(profile), entry);
        node.annotations
            .insert(DATA_ANNOTATION.into(), data.to_annotation().unwrap());
        cluster.insert_node(node).await;
    }

    fn params_on(cluster: &InMemoryCluster, node: &str, profile: &str) -> PluginParams {
        PluginParams {
            node: Node::new(node),
            profile: ProfileName::new(profile),
            state: MaintenanceState::MaintenanceRequired,
            client: Arc::new(cluster.clone()) as Arc<dyn ClusterClient>,
            now: Utc::now(),
            log_details: false,
        }
    }

    #[tokio::test]
    async fn max_maintenance_counts_profile_entries() {
        let cluster = InMemoryCluster::new();
        node_in_maintenance(&cluster, "busy-1", "flatcar").await;
        node_in_maintenance(&cluster, "busy-2", "other").await;

        let check = MaxMaintenanceCheck::from_config(&yaml("max: 1")).unwrap();

        // One flatcar node is already in maintenance: cap of 1 is reached.
        let result = check
            .check(&params_on(&cluster, "candidate", "flatcar"))
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.info["inMaintenance"], "1");

        // The "other" profile has its own budget.
        let check2 = MaxMaintenanceCheck::from_config(&yaml("max: 2")).unwrap();
        let result = check2
            .check(&params_on(&cluster, "candidate", "flatcar"))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn max_maintenance_ignores_the_candidate_itself() {
        let cluster = InMemoryCluster::new();
        node_in_maintenance(&cluster, "candidate", "flatcar").await;

        let check = MaxMaintenanceCheck::from_config(&yaml("max: 1")).unwrap();
        let result = check
            .check(&params_on(&cluster, "candidate", "flatcar"))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn stagger_admits_one_node_per_window() {
        let cluster = InMemoryCluster::new();
        let config = yaml("duration: 1h\nleaseName: stagger");
        let check = StaggerCheck::from_config(&config).unwrap();

        let first = check
            .check(&params_on(&cluster, "a", "flatcar"))
            .await
            .unwrap();
        assert!(first.passed);

        // Second node inside the window loses.
        let second = check
            .check(&params_on(&cluster, "b", "flatcar"))
            .await
            .unwrap();
        assert!(!second.passed);

        // Once the window has elapsed, the next node wins.
        let mut late = params_on(&cluster, "b", "flatcar");
        late.now = Utc::now() + chrono::Duration::hours(2);
        let third = check.check(&late).await.unwrap();
        assert!(third.passed);

        let lease = cluster.get_lease("kube-system", "stagger").await.unwrap().unwrap();
        assert!(lease.holder.unwrap().starts_with("b@"));
    }
}
