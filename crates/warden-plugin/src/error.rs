use thiserror::Error;
use warden_cluster::ClusterError;
use warden_expr::ExprError;

use crate::plugin::PluginKind;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown {kind} plugin type '{plugin_type}'")]
    UnknownType {
        kind: PluginKind,
        plugin_type: String,
    },

    #[error("duplicate {kind} instance name '{name}'")]
    DuplicateName { kind: PluginKind, name: String },

    #[error("invalid config for instance '{name}': {message}")]
    InvalidConfig { name: String, message: String },

    #[error("invalid schedule for instance '{name}': {message}")]
    InvalidSchedule { name: String, message: String },

    #[error("no {kind} instance named '{name}'")]
    UnknownInstance { kind: PluginKind, name: String },

    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    #[error("check instances failed: {plugins}")]
    ChecksFailed { plugins: String },

    #[error("notification errors:\n{0}")]
    Notification(String),

    #[error("trigger '{plugin}' failed: {source}")]
    Chain {
        plugin: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("http error: {0}")]
    Http(String),
}
