use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use warden_config::InstancesConfig;
use warden_expr::Expr;

use crate::chain::{CheckChain, NotificationChain, NotifyInstance, TriggerChain};
use crate::error::PluginError;
use crate::impls;
use crate::plugin::{CheckPlugin, NotifyPlugin, PluginKind, TriggerPlugin};
use crate::schedule::Schedule;

type CheckCtor =
    Box<dyn Fn(&serde_yaml::Value) -> Result<Arc<dyn CheckPlugin>, PluginError> + Send + Sync>;
type NotifyCtor =
    Box<dyn Fn(&serde_yaml::Value) -> Result<Arc<dyn NotifyPlugin>, PluginError> + Send + Sync>;
type TriggerCtor =
    Box<dyn Fn(&serde_yaml::Value) -> Result<Arc<dyn TriggerPlugin>, PluginError> + Send + Sync>;

/// Holds plugin types and the named instances built from them.
///
/// Types are registered once at startup; instances are rebuilt from the
/// descriptor on every config load. Chains borrow instances as `Arc`s; the
/// registry stays the owner.
#[derive(Default)]
pub struct Registry {
    check_types: BTreeMap<String, CheckCtor>,
    notify_types: BTreeMap<String, NotifyCtor>,
    trigger_types: BTreeMap<String, TriggerCtor>,

    checks: BTreeMap<String, Arc<dyn CheckPlugin>>,
    notifies: BTreeMap<String, NotifyInstance>,
    triggers: BTreeMap<String, Arc<dyn TriggerPlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in plugin type registered.
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        impls::register_builtin(&mut registry);
        registry
    }

    pub fn register_check_type(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&serde_yaml::Value) -> Result<Arc<dyn CheckPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    ) {
        self.check_types.insert(name.into(), Box::new(ctor));
    }

    pub fn register_notify_type(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&serde_yaml::Value) -> Result<Arc<dyn NotifyPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    ) {
        self.notify_types.insert(name.into(), Box::new(ctor));
    }

    pub fn register_trigger_type(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn(&serde_yaml::Value) -> Result<Arc<dyn TriggerPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    ) {
        self.trigger_types.insert(name.into(), Box::new(ctor));
    }

    /// Build every instance named in the descriptor. Kinds keep separate
    /// namespaces; within a kind, names must be unique.
    pub fn load_instances(
        &mut self,
        instances: &InstancesConfig,
        default_notify_interval: Duration,
    ) -> Result<(), PluginError> {
        for desc in &instances.check {
            let ctor = self.check_types.get(&desc.plugin_type).ok_or_else(|| {
                PluginError::UnknownType {
                    kind: PluginKind::Check,
                    plugin_type: desc.plugin_type.clone(),
                }
            })?;
            let instance = ctor(&desc.config)?;
            if self.checks.insert(desc.name.clone(), instance).is_some() {
                return Err(PluginError::DuplicateName {
                    kind: PluginKind::Check,
                    name: desc.name.clone(),
                });
            }
        }

        for desc in &instances.notify {
            let ctor = self.notify_types.get(&desc.plugin_type).ok_or_else(|| {
                PluginError::UnknownType {
                    kind: PluginKind::Notify,
                    plugin_type: desc.plugin_type.clone(),
                }
            })?;
            let plugin = ctor(&desc.config)?;
            let schedule = Schedule::from_config(
                desc.schedule.as_ref(),
                default_notify_interval,
                &desc.name,
            )?;
            let instance = NotifyInstance { plugin, schedule };
            if self.notifies.insert(desc.name.clone(), instance).is_some() {
                return Err(PluginError::DuplicateName {
                    kind: PluginKind::Notify,
                    name: desc.name.clone(),
                });
            }
        }

        for desc in &instances.trigger {
            let ctor = self.trigger_types.get(&desc.plugin_type).ok_or_else(|| {
                PluginError::UnknownType {
                    kind: PluginKind::Trigger,
                    plugin_type: desc.plugin_type.clone(),
                }
            })?;
            let instance = ctor(&desc.config)?;
            if self.triggers.insert(desc.name.clone(), instance).is_some() {
                return Err(PluginError::DuplicateName {
                    kind: PluginKind::Trigger,
                    name: desc.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Compile a check chain from a boolean expression over instance names.
    /// A blank expression yields the empty chain, which always passes.
    pub fn new_check_chain(&self, expression: &str) -> Result<CheckChain, PluginError> {
        if expression.trim().is_empty() {
            return Ok(CheckChain::empty());
        }

        let mut instances = Vec::new();
        for name in lex_identifiers(expression) {
            let instance = self.checks.get(&name).ok_or_else(|| {
                PluginError::UnknownInstance {
                    kind: PluginKind::Check,
                    name: name.clone(),
                }
            })?;
            instances.push((name, instance.clone()));
        }

        let expr = Expr::parse(expression)?;
        Ok(CheckChain::new(expression.to_string(), instances, expr))
    }

    /// Notification chains are flat conjunctions of instance names: every
    /// listed instance executes when due.
    pub fn new_notification_chain(
        &self,
        expression: &str,
    ) -> Result<NotificationChain, PluginError> {
        let mut instances = Vec::new();
        for name in split_conjunction(expression) {
            let instance = self.notifies.get(&name).ok_or_else(|| {
                PluginError::UnknownInstance {
                    kind: PluginKind::Notify,
                    name: name.clone(),
                }
            })?;
            instances.push((name, instance.clone()));
        }
        Ok(NotificationChain::new(instances))
    }

    pub fn new_trigger_chain(&self, expression: &str) -> Result<TriggerChain, PluginError> {
        let mut instances = Vec::new();
        for name in split_conjunction(expression) {
            let instance = self.triggers.get(&name).ok_or_else(|| {
                PluginError::UnknownInstance {
                    kind: PluginKind::Trigger,
                    name: name.clone(),
                }
            })?;
            instances.push((name, instance.clone()));
        }
        Ok(TriggerChain::new(instances))
    }
}

/// Identifiers of a check expression in first-appearance order, deduplicated:
/// a name referenced twice is executed once.
fn lex_identifiers(expression: &str) -> Vec<String> {
    let stripped = expression
        .replace("&&", " ")
        .replace("||", " ")
        .replace(['!', '(', ')'], " ");
    let mut names: Vec<String> = Vec::new();
    for token in stripped.split_whitespace() {
        if !names.iter().any(|n| n == token) {
            names.push(token.to_string());
        }
    }
    names
}

fn split_conjunction(expression: &str) -> Vec<String> {
    expression
        .split("&&")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
