pub mod constants;
pub mod data;
pub mod error;
pub mod info;
pub mod types;

pub use constants::*;
pub use data::{ProfileData, ProfileEntry};
pub use error::DomainError;
pub use info::{CheckChainInfo, CheckInfo, NodeInfo, ProfileInfo, TransitionInfo};
pub use types::{
    Lease, MaintenanceState, Node, NodeCondition, NodeName, OwnerRef, Pod, ProfileName,
};
