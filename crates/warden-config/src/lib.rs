mod esx;
mod kubernikus;
mod loader;
mod maintenance;
pub mod error;

pub use error::ConfigError;
pub use esx::{
    CheckInterval, EsxConfig, EsxIntervals, PeriodTimeout, PodEvictionInterval,
    VCenterCredential, VCentersConfig,
};
pub use kubernikus::{CloudProviderSecretRef, KubernikusConfig, OpenStackCredentials};
pub use loader::{load_esx_config, load_kubernikus_config, load_maintenance_config};
pub use maintenance::{
    InstanceConfig, InstancesConfig, Intervals, MaintenanceConfig, NotifyInstanceConfig,
    ProfileConfig, ScheduleConfig, StateConfig, TransitionConfig,
};
