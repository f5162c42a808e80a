use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ConfigError;
use crate::esx::EsxConfig;
use crate::kubernikus::KubernikusConfig;
use crate::maintenance::MaintenanceConfig;

/// Load `maintenance.yaml`. Called once per reconciliation so config edits
/// apply without a restart.
pub fn load_maintenance_config(path: &Path) -> Result<MaintenanceConfig, ConfigError> {
    load_yaml(path)
}

pub fn load_esx_config(path: &Path) -> Result<EsxConfig, ConfigError> {
    load_yaml(path)
}

pub fn load_kubernikus_config(path: &Path) -> Result<KubernikusConfig, ConfigError> {
    load_yaml(path)
}

/// Read, expand `${VAR}` references from the environment, then parse.
fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let path_display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path_display.clone(),
        source: e,
    })?;
    let expanded = shellexpand::env(&content).map_err(|e| ConfigError::EnvExpand {
        path: path_display.clone(),
        message: e.to_string(),
    })?;
    debug!(path = %path_display, "loading config");
    serde_yaml::from_str(&expanded).map_err(|e| ConfigError::YamlParse {
        path: path_display,
        source: e,
    })
}
