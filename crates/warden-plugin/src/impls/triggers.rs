use async_trait::async_trait;
use serde::Deserialize;
use warden_cluster::NodePatch;

use crate::error::PluginError;
use crate::impls::parse_config;
use crate::plugin::{PluginParams, TriggerPlugin};

#[derive(Debug, Deserialize)]
struct AlterConfig {
    key: String,
    #[serde(default)]
    value: Option<String>,
    /// Remove the key instead of setting it.
    #[serde(default)]
    remove: bool,
}

impl AlterConfig {
    fn validate(self, plugin_type: &str) -> Result<Self, PluginError> {
        if !self.remove && self.value.is_none() {
            return Err(PluginError::InvalidConfig {
                name: plugin_type.to_string(),
                message: "either 'value' or 'remove: true' is required".into(),
            });
        }
        Ok(self)
    }
}

/// Sets or removes a label on the node.
pub struct AlterLabelTrigger {
    config: AlterConfig,
}

impl AlterLabelTrigger {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: AlterConfig = parse_config("alterLabel", config)?;
        Ok(AlterLabelTrigger {
            config: cfg.validate("alterLabel")?,
        })
    }
}

#[async_trait]
impl TriggerPlugin for AlterLabelTrigger {
    fn id(&self) -> &'static str {
        "alterLabel"
    }

    async fn trigger(&self, params: &PluginParams) -> Result<(), PluginError> {
        let patch = if self.config.remove {
            NodePatch::new().remove_label(&self.config.key)
        } else {
            NodePatch::new().set_label(
                &self.config.key,
                self.config.value.clone().unwrap_or_default(),
            )
        };
        params.client.patch_node(&params.node.name, &patch).await?;
        Ok(())
    }
}

/// Sets or removes an annotation on the node.
pub struct AlterAnnotationTrigger {
    config: AlterConfig,
}

impl AlterAnnotationTrigger {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: AlterConfig = parse_config("alterAnnotation", config)?;
        Ok(AlterAnnotationTrigger {
            config: cfg.validate("alterAnnotation")?,
        })
    }
}

#[async_trait]
impl TriggerPlugin for AlterAnnotationTrigger {
    fn id(&self) -> &'static str {
        "alterAnnotation"
    }

    async fn trigger(&self, params: &PluginParams) -> Result<(), PluginError> {
        let patch = if self.config.remove {
            NodePatch::new().remove_annotation(&self.config.key)
        } else {
            NodePatch::new().set_annotation(
                &self.config.key,
                self.config.value.clone().unwrap_or_default(),
            )
        };
        params.client.patch_node(&params.node.name, &patch).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SchedulableConfig {
    schedulable: bool,
}

/// Cordons (`schedulable: false`) or uncordons (`schedulable: true`) the node.
pub struct SchedulableTrigger {
    schedulable: bool,
}

impl SchedulableTrigger {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: SchedulableConfig = parse_config("schedulable", config)?;
        Ok(SchedulableTrigger {
            schedulable: cfg.schedulable,
        })
    }
}

#[async_trait]
impl TriggerPlugin for SchedulableTrigger {
    fn id(&self) -> &'static str {
        "schedulable"
    }

    async fn trigger(&self, params: &PluginParams) -> Result<(), PluginError> {
        let patch = NodePatch::new().unschedulable(!self.schedulable);
        params.client.patch_node(&params.node.name, &patch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use warden_cluster::{ClusterClient, InMemoryCluster};
    use warden_domain::{MaintenanceState, Node, NodeName, ProfileName};

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    async fn params_with(cluster: &InMemoryCluster) -> PluginParams {
        cluster.insert_node(Node::new("n1")).await;
        PluginParams {
            node: Node::new("n1"),
            profile: ProfileName::new("default"),
            state: MaintenanceState::MaintenanceRequired,
            client: Arc::new(cluster.clone()) as Arc<dyn ClusterClient>,
            now: Utc::now(),
            log_details: false,
        }
    }

    #[tokio::test]
    async fn alter_label_sets_and_removes() {
        let cluster = InMemoryCluster::new();
        let params = params_with(&cluster).await;

        let set = AlterLabelTrigger::from_config(&yaml("key: reboot\nvalue: \"ok\"")).unwrap();
        set.trigger(&params).await.unwrap();
        let node = cluster.get_node(&NodeName::new("n1")).await.unwrap().unwrap();
        assert_eq!(node.label("reboot"), Some("ok"));

        let remove = AlterLabelTrigger::from_config(&yaml("key: reboot\nremove: true")).unwrap();
        remove.trigger(&params).await.unwrap();
        let node = cluster.get_node(&NodeName::new("n1")).await.unwrap().unwrap();
        assert_eq!(node.label("reboot"), None);
    }

    #[tokio::test]
    async fn schedulable_trigger_cordons() {
        let cluster = InMemoryCluster::new();
        let params = params_with(&cluster).await;

        let cordon = SchedulableTrigger::from_config(&yaml("schedulable: false")).unwrap();
        cordon.trigger(&params).await.unwrap();
        let node = cluster.get_node(&NodeName::new("n1")).await.unwrap().unwrap();
        assert!(node.unschedulable);

        let uncordon = SchedulableTrigger::from_config(&yaml("schedulable: true")).unwrap();
        uncordon.trigger(&params).await.unwrap();
        let node = cluster.get_node(&NodeName::new("n1")).await.unwrap().unwrap();
        assert!(!node.unschedulable);
    }

    #[test]
    fn alter_without_value_or_remove_is_rejected() {
        assert!(AlterAnnotationTrigger::from_config(&yaml("key: x")).is_err());
    }
}
