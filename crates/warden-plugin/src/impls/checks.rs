use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PluginError;
use crate::impls::parse_config;
use crate::plugin::{CheckPlugin, CheckResult, PluginParams};

#[derive(Debug, Deserialize)]
struct KeyValueConfig {
    key: String,
    /// Absent means "key exists with any value".
    #[serde(default)]
    value: Option<String>,
}

/// Passes when the node carries the configured label.
pub struct HasLabelCheck {
    key: String,
    value: Option<String>,
}

impl HasLabelCheck {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: KeyValueConfig = parse_config("hasLabel", config)?;
        Ok(HasLabelCheck {
            key: cfg.key,
            value: cfg.value,
        })
    }
}

#[async_trait]
impl CheckPlugin for HasLabelCheck {
    fn id(&self) -> &'static str {
        "hasLabel"
    }

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError> {
        let observed = params.node.label(&self.key);
        let passed = match &self.value {
            Some(expected) => observed == Some(expected.as_str()),
            None => observed.is_some(),
        };
        Ok(CheckResult {
            passed,
            info: [("observed".to_string(), observed.unwrap_or("").to_string())].into(),
        })
    }
}

/// Passes when the node carries the configured annotation.
pub struct HasAnnotationCheck {
    key: String,
    value: Option<String>,
}

impl HasAnnotationCheck {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: KeyValueConfig = parse_config("hasAnnotation", config)?;
        Ok(HasAnnotationCheck {
            key: cfg.key,
            value: cfg.value,
        })
    }
}

#[async_trait]
impl CheckPlugin for HasAnnotationCheck {
    fn id(&self) -> &'static str {
        "hasAnnotation"
    }

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError> {
        let observed = params.node.annotation(&self.key);
        let passed = match &self.value {
            Some(expected) => observed == Some(expected.as_str()),
            None => observed.is_some(),
        };
        Ok(CheckResult {
            passed,
            info: [("observed".to_string(), observed.unwrap_or("").to_string())].into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

/// Passes when a node condition has the configured status, e.g.
/// `type: Ready, status: "True"`.
pub struct ConditionCheck {
    condition_type: String,
    status: String,
}

impl ConditionCheck {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: ConditionConfig = parse_config("condition", config)?;
        Ok(ConditionCheck {
            condition_type: cfg.condition_type,
            status: cfg.status,
        })
    }
}

#[async_trait]
impl CheckPlugin for ConditionCheck {
    fn id(&self) -> &'static str {
        "condition"
    }

    async fn check(&self, params: &PluginParams) -> Result<CheckResult, PluginError> {
        let passed = params
            .node
            .conditions
            .iter()
            .any(|c| c.condition_type == self.condition_type && c.status == self.status);
        Ok(CheckResult {
            passed,
            info: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use warden_cluster::InMemoryCluster;
    use warden_domain::{MaintenanceState, Node, NodeCondition, ProfileName};

    fn params_for(node: Node) -> PluginParams {
        PluginParams {
            node,
            profile: ProfileName::new("default"),
            state: MaintenanceState::Operational,
            client: Arc::new(InMemoryCluster::new()),
            now: Utc::now(),
            log_details: false,
        }
    }

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn has_annotation_matches_value() {
        let check = HasAnnotationCheck::from_config(&yaml("key: approve\nvalue: \"true\"")).unwrap();

        let mut node = Node::new("n1");
        assert!(!check.check(&params_for(node.clone())).await.unwrap().passed);

        node.annotations.insert("approve".into(), "true".into());
        assert!(check.check(&params_for(node.clone())).await.unwrap().passed);

        node.annotations.insert("approve".into(), "false".into());
        assert!(!check.check(&params_for(node)).await.unwrap().passed);
    }

    #[tokio::test]
    async fn has_label_without_value_checks_presence() {
        let check = HasLabelCheck::from_config(&yaml("key: role")).unwrap();
        let mut node = Node::new("n1");
        assert!(!check.check(&params_for(node.clone())).await.unwrap().passed);
        node.labels.insert("role".into(), "worker".into());
        assert!(check.check(&params_for(node)).await.unwrap().passed);
    }

    #[tokio::test]
    async fn condition_check_matches_type_and_status() {
        let check = ConditionCheck::from_config(&yaml("type: Ready\nstatus: \"True\"")).unwrap();
        let mut node = Node::new("n1");
        node.conditions.push(NodeCondition {
            condition_type: "Ready".into(),
            status: "False".into(),
        });
        assert!(!check.check(&params_for(node.clone())).await.unwrap().passed);
        node.conditions[0].status = "True".into();
        assert!(check.check(&params_for(node)).await.unwrap().passed);
    }

    #[test]
    fn bad_config_is_rejected() {
        assert!(HasLabelCheck::from_config(&yaml("value: only")).is_err());
    }
}
