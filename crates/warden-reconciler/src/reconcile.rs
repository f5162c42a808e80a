use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use warden_cluster::{ClusterClient, NodePatch};
use warden_config::load_maintenance_config;
use warden_domain::{
    MaintenanceState, Node, NodeInfo, NodeName, ProfileData, ProfileInfo,
    DATA_ANNOTATION, LOG_DETAILS_LABEL, PROFILE_LABEL, STATE_LABEL, TRANSITION_EVENT_REASON,
};
use warden_plugin::{PluginParams, Registry};

use crate::cache::NodeInfoCache;
use crate::error::ReconcileError;
use crate::metrics;
use crate::profile::{self, Profile};

/// Per-node reconciliation: load config, drive every profile's state machine,
/// persist the result on the node, refresh the info cache.
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    cache: Arc<NodeInfoCache>,
    config_path: PathBuf,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        cache: Arc<NodeInfoCache>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Reconciler {
            client,
            cache,
            config_path: config_path.into(),
        }
    }

    pub fn cache(&self) -> Arc<NodeInfoCache> {
        self.cache.clone()
    }

    /// Reconcile one node. Config is parsed fresh on every call so edits
    /// apply without a restart; a corrupt config advances nothing.
    pub async fn reconcile(&self, name: &NodeName) -> Result<(), ReconcileError> {
        let config = load_maintenance_config(&self.config_path)?;

        let node = match self.client.get_node(name).await? {
            Some(node) => node,
            None => {
                self.cache.delete(name.as_str());
                return Ok(());
            }
        };

        let profiles = node.profiles();
        let profiles_string = node.label(PROFILE_LABEL).unwrap_or_default().to_string();
        let now = Utc::now();

        let mut data = match ProfileData::parse(node.annotation(DATA_ANNOTATION)) {
            Ok(data) => data,
            Err(e) => {
                warn!(node = %name, error = %e, "resetting unreadable profile data");
                ProfileData::default()
            }
        };
        data.align(&profiles, &profiles_string, now);

        let mut registry = Registry::with_builtin_plugins();
        registry.load_instances(&config.instances, config.intervals.notify)?;

        let log_details = node.has_label(LOG_DETAILS_LABEL, "true");
        let mut profile_infos: Vec<ProfileInfo> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        // Profiles run in label order; one profile erroring never blocks the
        // others on the same node.
        for profile_name in &profiles {
            let entry_state = match data.entry(profile_name) {
                Some(entry) => entry.state,
                None => MaintenanceState::Operational,
            };

            let profile_config = match config.profile(profile_name.as_str()) {
                Some(config) => config,
                None => {
                    errors.push(format!("profile '{}' is not configured", profile_name));
                    profile_infos.push(ProfileInfo {
                        name: profile_name.to_string(),
                        state: entry_state,
                        transitions: vec![],
                    });
                    continue;
                }
            };

            let compiled = match Profile::build(profile_config, &registry) {
                Ok(profile) => profile,
                Err(e) => {
                    errors.push(format!("profile '{}': {}", profile_name, e));
                    profile_infos.push(ProfileInfo {
                        name: profile_name.to_string(),
                        state: entry_state,
                        transitions: vec![],
                    });
                    continue;
                }
            };

            let params = PluginParams {
                node: node.clone(),
                profile: profile_name.clone(),
                state: entry_state,
                client: self.client.clone(),
                now,
                log_details,
            };

            let entry = match data.entry_mut(profile_name) {
                Some(entry) => entry,
                None => continue,
            };
            let outcome = profile::apply(&compiled, entry, &params).await;

            if let Some((from, to)) = outcome.transitioned {
                info!(
                    node = %name,
                    profile = %profile_name,
                    from = %from,
                    to = %to,
                    "maintenance state changed"
                );
                if let Err(e) = self
                    .client
                    .emit_event(
                        name,
                        TRANSITION_EVENT_REASON,
                        &format!("profile {}: {} -> {}", profile_name, from, to),
                    )
                    .await
                {
                    errors.push(format!("event: {}", e));
                }
                if to == MaintenanceState::InMaintenance {
                    match self.client.list_pods_on_node(name).await {
                        Ok(pods) => metrics::record_shuffles(&pods, profile_name.as_str()),
                        Err(e) => warn!(node = %name, error = %e, "shuffle metrics skipped"),
                    }
                }
            }

            errors.extend(outcome.errors);
            profile_infos.push(outcome.info);
        }

        self.write_back(&node, &profiles, &data).await?;

        // Refetch so trigger-applied labels show up in the snapshot.
        let labels = match self.client.get_node(name).await? {
            Some(current) => current.labels,
            None => node.labels,
        };
        self.cache.update(NodeInfo {
            node_name: name.to_string(),
            updated: now,
            labels,
            profiles: profile_infos,
        });

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Profiles(errors.join("\n")))
        }
    }

    /// Patch the state label and data annotation, but only when they differ
    /// from what the node already carries: re-applying a reconciliation with
    /// no changes touches nothing.
    async fn write_back(
        &self,
        node: &Node,
        profiles: &[warden_domain::ProfileName],
        data: &ProfileData,
    ) -> Result<(), ReconcileError> {
        // The state label mirrors the first profile only; the annotation
        // carries the full per-profile record.
        let first_state = profiles
            .first()
            .and_then(|p| data.entry(p))
            .map(|e| e.state)
            .unwrap_or_default();
        let annotation = data.to_annotation()?;

        let mut patch = NodePatch::new();
        if node.label(STATE_LABEL) != Some(first_state.to_string().as_str()) {
            patch = patch.set_label(STATE_LABEL, first_state.to_string());
        }
        if node.annotation(DATA_ANNOTATION) != Some(annotation.as_str()) {
            patch = patch.set_annotation(DATA_ANNOTATION, annotation);
        }
        if !patch.is_empty() {
            self.client.patch_node(&node.name, &patch).await?;
        }
        Ok(())
    }
}
