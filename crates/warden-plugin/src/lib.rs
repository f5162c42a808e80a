pub mod chain;
pub mod error;
pub mod impls;
pub mod plugin;
pub mod registry;
pub mod schedule;

pub use chain::{CheckChain, NotificationChain, TriggerChain};
pub use error::PluginError;
pub use plugin::{CheckPlugin, CheckResult, NotifyPlugin, PluginKind, PluginParams, TriggerPlugin};
pub use registry::Registry;
pub use schedule::Schedule;
