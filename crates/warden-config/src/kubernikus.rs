use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::esx::{PeriodTimeout, PodEvictionInterval};
use crate::error::ConfigError;

/// `kubernikus.yaml`: timings for the kubelet-version / node-deletion
/// controller and where to find the OpenStack credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernikusConfig {
    pub intervals: KubernikusIntervals,
    /// Cluster secret holding the OpenStack credentials. Absent means the
    /// `./provider/cloudprovider.conf` file is used instead.
    #[serde(rename = "cloudProviderSecret", default)]
    pub cloud_provider_secret: Option<CloudProviderSecretRef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernikusIntervals {
    #[serde(with = "humantime_serde")]
    pub check: Duration,
    pub pod_deletion: PeriodTimeout,
    pub pod_eviction: PodEvictionInterval,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudProviderSecretRef {
    pub name: String,
    pub namespace: String,
}

/// OpenStack access, sourced from the cloud provider conf file or a cluster
/// secret with the same keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenStackCredentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub region: String,
    pub domain_name: String,
    pub tenant_id: String,
}

impl OpenStackCredentials {
    /// Parse the `key = value` lines of `cloudprovider.conf`, ignoring
    /// section headers and comments. Values may be double-quoted.
    pub fn from_conf(content: &str, path: &str) -> Result<Self, ConfigError> {
        let mut values: BTreeMap<String, String> = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').to_string();
                values.insert(key.trim().to_string(), value);
            }
        }
        Self::from_map(&values, path)
    }

    pub fn from_map(
        values: &BTreeMap<String, String>,
        path: &str,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            values.get(key).cloned().ok_or_else(|| ConfigError::Invalid {
                path: path.to_string(),
                message: format!("missing credential key '{}'", key),
            })
        };
        Ok(OpenStackCredentials {
            auth_url: get("auth-url")?,
            username: get("username")?,
            password: get("password")?,
            region: get("region")?,
            domain_name: get("domain-name")?,
            tenant_id: get("tenant-id")?,
        })
    }
}
