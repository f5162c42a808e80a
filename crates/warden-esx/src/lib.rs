pub mod client;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod sim;

pub use client::{HostApi, HostApiPool, HostRuntime, VCenterClient, VCenterPool, VmPowerState};
pub use coordinator::EsxCoordinator;
pub use error::EsxError;
pub use host::{group_hosts, Host, HostMaintenance};
pub use sim::{SimHostApi, SimPool};
