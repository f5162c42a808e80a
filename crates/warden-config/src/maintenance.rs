use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_domain::MaintenanceState;

/// `maintenance.yaml`: intervals, plugin instance descriptors, and profiles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    pub intervals: Intervals,
    #[serde(default)]
    pub instances: InstancesConfig,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

impl MaintenanceConfig {
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Intervals {
    /// Delay between reconciliation passes over the node set.
    #[serde(with = "humantime_serde")]
    pub requeue: Duration,
    /// Default periodic notification interval for instances without an
    /// explicit schedule.
    #[serde(with = "humantime_serde", default = "default_notify_interval")]
    pub notify: Duration,
}

fn default_notify_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// The plugin instance descriptor: one list per kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstancesConfig {
    #[serde(default)]
    pub check: Vec<InstanceConfig>,
    #[serde(default)]
    pub notify: Vec<NotifyInstanceConfig>,
    #[serde(default)]
    pub trigger: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyInstanceConfig {
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
    /// Absent means periodic with `intervals.notify`.
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleConfig {
    Periodic {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    Scheduled {
        /// Wall-clock time of day, `"HH:MM"`.
        instant: String,
        /// Weekday names, e.g. `["monday", "thursday"]`.
        weekdays: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    pub name: String,
    /// Cluster-wide cap on nodes simultaneously `in-maintenance` for this
    /// profile. Absent means uncapped (operators may still gate through the
    /// `maxMaintenance` check plugin).
    #[serde(rename = "maxParallel", default)]
    pub max_parallel: Option<u32>,
    #[serde(default)]
    pub operational: StateConfig,
    #[serde(rename = "maintenance-required", default)]
    pub maintenance_required: StateConfig,
    #[serde(rename = "in-maintenance", default)]
    pub in_maintenance: StateConfig,
}

impl ProfileConfig {
    pub fn state(&self, state: MaintenanceState) -> &StateConfig {
        match state {
            MaintenanceState::Operational => &self.operational,
            MaintenanceState::MaintenanceRequired => &self.maintenance_required,
            MaintenanceState::InMaintenance => &self.in_maintenance,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateConfig {
    /// Notification chain expression: instance names joined with `&&`.
    #[serde(default)]
    pub notify: String,
    #[serde(default)]
    pub transitions: Vec<TransitionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransitionConfig {
    /// Check chain expression guarding this transition.
    #[serde(default)]
    pub check: String,
    /// Trigger chain expression executed on commit.
    #[serde(default)]
    pub trigger: String,
    pub next: MaintenanceState,
}
