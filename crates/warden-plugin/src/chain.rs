use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use warden_domain::{CheckChainInfo, CheckInfo};
use warden_expr::Expr;

use crate::error::PluginError;
use crate::plugin::{CheckPlugin, NotifyPlugin, PluginParams, TriggerPlugin};
use crate::schedule::Schedule;

/// An ordered set of check instances plus the compiled expression over their
/// names. Every referenced instance runs exactly once per execution; the
/// expression is only evaluated afterwards, so checks with side effects
/// (counters, lease writes) are never skipped by short-circuiting.
pub struct CheckChain {
    expression: String,
    instances: Vec<(String, Arc<dyn CheckPlugin>)>,
    expr: Option<Expr>,
}

impl CheckChain {
    pub(crate) fn new(
        expression: String,
        instances: Vec<(String, Arc<dyn CheckPlugin>)>,
        expr: Expr,
    ) -> Self {
        CheckChain {
            expression,
            instances,
            expr: Some(expr),
        }
    }

    /// The empty chain: passes without invoking anything.
    pub fn empty() -> Self {
        CheckChain {
            expression: String::new(),
            instances: Vec::new(),
            expr: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Run every instance, then evaluate. When any instance errors, the
    /// result is `passed=false` with an error naming the failed instances and
    /// the expression is left unevaluated.
    pub async fn execute(
        &self,
        params: &PluginParams,
    ) -> (CheckChainInfo, Option<PluginError>) {
        let expr = match &self.expr {
            None => return (CheckChainInfo::empty(), None),
            Some(expr) => expr,
        };

        let mut truth: BTreeMap<String, bool> = BTreeMap::new();
        let mut info: BTreeMap<String, CheckInfo> = BTreeMap::new();
        let mut failed: Vec<String> = Vec::new();

        for (name, instance) in &self.instances {
            match instance.check(params).await {
                Ok(result) => {
                    if params.log_details {
                        debug!(
                            node = %params.node.name,
                            profile = %params.profile,
                            check = %name,
                            passed = result.passed,
                            "check evaluated"
                        );
                    }
                    truth.insert(name.clone(), result.passed);
                    info.insert(
                        name.clone(),
                        CheckInfo {
                            id: instance.id().to_string(),
                            passed: result.passed,
                            info: result.info,
                            error: None,
                        },
                    );
                }
                Err(e) => {
                    truth.insert(name.clone(), false);
                    info.insert(
                        name.clone(),
                        CheckInfo {
                            id: instance.id().to_string(),
                            passed: false,
                            info: BTreeMap::new(),
                            error: Some(e.to_string()),
                        },
                    );
                    failed.push(name.clone());
                }
            }
        }

        if !failed.is_empty() {
            let chain_info = CheckChainInfo {
                expression: self.expression.clone(),
                passed: false,
                info,
            };
            return (
                chain_info,
                Some(PluginError::ChecksFailed {
                    plugins: failed.join(", "),
                }),
            );
        }

        match expr.eval(&truth) {
            Ok(passed) => (
                CheckChainInfo {
                    expression: self.expression.clone(),
                    passed,
                    info,
                },
                None,
            ),
            Err(e) => (
                CheckChainInfo {
                    expression: self.expression.clone(),
                    passed: false,
                    info,
                },
                Some(PluginError::Expression(e)),
            ),
        }
    }

    /// Fire the transition hook on every instance of this chain. Called once
    /// for the winning transition of a cycle.
    pub async fn on_transition(&self, params: &PluginParams) -> Result<(), PluginError> {
        for (name, instance) in &self.instances {
            instance
                .on_transition(params)
                .await
                .map_err(|e| PluginError::Chain {
                    plugin: name.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotifyInstance {
    pub plugin: Arc<dyn NotifyPlugin>,
    pub schedule: Schedule,
}

/// Notify instances executed in order, each gated by its own schedule.
/// Errors accumulate; every due instance is attempted.
pub struct NotificationChain {
    instances: Vec<(String, NotifyInstance)>,
}

impl NotificationChain {
    pub(crate) fn new(instances: Vec<(String, NotifyInstance)>) -> Self {
        NotificationChain { instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// `last_sent` maps instance name to the last successful send; updated in
    /// place so the caller can persist it.
    pub async fn execute(
        &self,
        params: &PluginParams,
        last_sent: &mut BTreeMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), PluginError> {
        let mut errors: Vec<String> = Vec::new();
        for (name, instance) in &self.instances {
            if !instance.schedule.is_due(now, last_sent.get(name).copied()) {
                continue;
            }
            match instance.plugin.notify(params).await {
                Ok(()) => {
                    last_sent.insert(name.clone(), now);
                }
                Err(e) => errors.push(format!("{}: {}", name, e)),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Notification(errors.join("\n")))
        }
    }
}

/// Trigger instances executed in order; the first failure aborts the chain.
pub struct TriggerChain {
    instances: Vec<(String, Arc<dyn TriggerPlugin>)>,
}

impl TriggerChain {
    pub(crate) fn new(instances: Vec<(String, Arc<dyn TriggerPlugin>)>) -> Self {
        TriggerChain { instances }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub async fn execute(&self, params: &PluginParams) -> Result<(), PluginError> {
        for (name, instance) in &self.instances {
            instance
                .trigger(params)
                .await
                .map_err(|e| PluginError::Chain {
                    plugin: name.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}
