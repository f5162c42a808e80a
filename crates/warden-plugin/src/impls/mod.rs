//! Built-in plugin types.
//!
//! Checks inspect the node or the cluster, notifies post outward, triggers
//! mutate the node. Operators compose these by name in profile expressions.

mod admission;
mod checks;
mod notify;
mod triggers;

pub use admission::{MaxMaintenanceCheck, StaggerCheck};
pub use checks::{ConditionCheck, HasAnnotationCheck, HasLabelCheck};
pub use notify::WebhookNotify;
pub use triggers::{AlterAnnotationTrigger, AlterLabelTrigger, SchedulableTrigger};

use std::sync::Arc;

use crate::plugin::{CheckPlugin, NotifyPlugin, TriggerPlugin};
use crate::registry::Registry;

pub(crate) fn register_builtin(registry: &mut Registry) {
    registry.register_check_type("hasLabel", |config| {
        Ok(Arc::new(HasLabelCheck::from_config(config)?) as Arc<dyn CheckPlugin>)
    });
    registry.register_check_type("hasAnnotation", |config| {
        Ok(Arc::new(HasAnnotationCheck::from_config(config)?) as Arc<dyn CheckPlugin>)
    });
    registry.register_check_type("condition", |config| {
        Ok(Arc::new(ConditionCheck::from_config(config)?) as Arc<dyn CheckPlugin>)
    });
    registry.register_check_type("maxMaintenance", |config| {
        Ok(Arc::new(MaxMaintenanceCheck::from_config(config)?) as Arc<dyn CheckPlugin>)
    });
    registry.register_check_type("stagger", |config| {
        Ok(Arc::new(StaggerCheck::from_config(config)?) as Arc<dyn CheckPlugin>)
    });

    registry.register_notify_type("webhook", |config| {
        Ok(Arc::new(WebhookNotify::from_config(config)?) as Arc<dyn NotifyPlugin>)
    });

    registry.register_trigger_type("alterLabel", |config| {
        Ok(Arc::new(AlterLabelTrigger::from_config(config)?) as Arc<dyn TriggerPlugin>)
    });
    registry.register_trigger_type("alterAnnotation", |config| {
        Ok(Arc::new(AlterAnnotationTrigger::from_config(config)?) as Arc<dyn TriggerPlugin>)
    });
    registry.register_trigger_type("schedulable", |config| {
        Ok(Arc::new(SchedulableTrigger::from_config(config)?) as Arc<dyn TriggerPlugin>)
    });
}

/// Parse a plugin config block into its typed form.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    plugin_type: &str,
    config: &serde_yaml::Value,
) -> Result<T, crate::error::PluginError> {
    serde_yaml::from_value(config.clone()).map_err(|e| crate::error::PluginError::InvalidConfig {
        name: plugin_type.to_string(),
        message: e.to_string(),
    })
}
