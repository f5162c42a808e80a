pub mod client;
pub mod drain;
pub mod error;
pub mod kube;
pub mod leader;
pub mod memory;

pub use client::{ClusterClient, EventRecord, EvictionStyle, NodePatch};
pub use drain::{ensure_drain, eviction_style, DrainParams};
pub use error::ClusterError;
pub use kube::KubeCluster;
pub use leader::LeaderElector;
pub use memory::InMemoryCluster;
