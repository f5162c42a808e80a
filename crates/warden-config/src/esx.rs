use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `esx.yaml`: timings for the hypervisor maintenance controller, alarm names
/// that force a shutdown, and per-availability-zone vCenter access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EsxConfig {
    pub intervals: EsxIntervals,
    /// Active host alarm names that put a host into the `alarm` state.
    #[serde(default)]
    pub alarms: Vec<String>,
    #[serde(rename = "vCenters")]
    pub v_centers: VCentersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EsxIntervals {
    pub check: CheckInterval,
    pub pod_deletion: PeriodTimeout,
    pub pod_eviction: PodEvictionInterval,
    pub vm_shutdown: PeriodTimeout,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckInterval {
    /// Fractional jitter applied to `period`: the cycle sleeps
    /// `period * (1 ± jitter)`.
    pub jitter: f64,
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeriodTimeout {
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PodEvictionInterval {
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Fall back to pod deletion when eviction keeps failing past `timeout`.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VCentersConfig {
    /// vCenter URL template; `$AZ` is replaced with the availability zone.
    pub template_url: String,
    #[serde(default)]
    pub insecure: bool,
    /// Availability zone → credentials.
    #[serde(default)]
    pub credentials: BTreeMap<String, VCenterCredential>,
}

impl VCentersConfig {
    pub fn url_for_zone(&self, zone: &str) -> String {
        self.template_url.replace("$AZ", zone)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VCenterCredential {
    pub username: String,
    pub password: String,
}
