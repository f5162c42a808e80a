use tracing::{debug, warn};
use warden_config::ProfileConfig;
use warden_domain::{
    MaintenanceState, ProfileData, ProfileEntry, ProfileInfo, ProfileName, TransitionInfo,
    DATA_ANNOTATION, STATE_LABEL,
};
use warden_plugin::{
    CheckChain, NotificationChain, PluginParams, Registry, TriggerChain,
};

use crate::error::ReconcileError;
use crate::metrics;

/// A profile compiled against the current registry: three states, each with
/// a notification chain and ordered outgoing transitions.
pub struct Profile {
    pub name: ProfileName,
    pub max_parallel: Option<u32>,
    operational: StateNode,
    maintenance_required: StateNode,
    in_maintenance: StateNode,
}

struct StateNode {
    notify: NotificationChain,
    transitions: Vec<Transition>,
}

struct Transition {
    check: CheckChain,
    trigger: TriggerChain,
    target: MaintenanceState,
}

impl Profile {
    pub fn build(config: &ProfileConfig, registry: &Registry) -> Result<Profile, ReconcileError> {
        let build_state = |state: MaintenanceState| -> Result<StateNode, ReconcileError> {
            let state_config = config.state(state);
            let notify = registry.new_notification_chain(&state_config.notify)?;
            let transitions = state_config
                .transitions
                .iter()
                .map(|t| -> Result<Transition, ReconcileError> {
                    Ok(Transition {
                        check: registry.new_check_chain(&t.check)?,
                        trigger: registry.new_trigger_chain(&t.trigger)?,
                        target: t.next,
                    })
                })
                .collect::<Result<Vec<_>, ReconcileError>>()?;
            Ok(StateNode {
                notify,
                transitions,
            })
        };

        Ok(Profile {
            name: ProfileName::new(&config.name),
            max_parallel: config.max_parallel,
            operational: build_state(MaintenanceState::Operational)?,
            maintenance_required: build_state(MaintenanceState::MaintenanceRequired)?,
            in_maintenance: build_state(MaintenanceState::InMaintenance)?,
        })
    }

    fn state_node(&self, state: MaintenanceState) -> &StateNode {
        match state {
            MaintenanceState::Operational => &self.operational,
            MaintenanceState::MaintenanceRequired => &self.maintenance_required,
            MaintenanceState::InMaintenance => &self.in_maintenance,
        }
    }
}

/// Result of one (node, profile) evaluation.
pub struct ProfileOutcome {
    pub info: ProfileInfo,
    pub transitioned: Option<(MaintenanceState, MaintenanceState)>,
    pub errors: Vec<String>,
}

/// Drive one profile on one node for one cycle.
///
/// Order: notify, then transitions in declaration order. The first transition
/// whose chain passes is the candidate; admission may suppress it, a failing
/// trigger leaves the state untouched for retry. At most one transition
/// commits per cycle, and `last_transition` never moves backwards.
pub async fn apply(
    profile: &Profile,
    entry: &mut ProfileEntry,
    params: &PluginParams,
) -> ProfileOutcome {
    let current = entry.state;
    let node = profile.state_node(current);
    let mut errors: Vec<String> = Vec::new();
    let mut transitions: Vec<TransitionInfo> = Vec::new();
    let mut transitioned = None;

    if let Err(e) = node
        .notify
        .execute(params, &mut entry.last_notify_times, params.now)
        .await
    {
        errors.push(format!("notify: {}", e));
    }

    for transition in &node.transitions {
        let (chain_info, chain_err) = transition.check.execute(params).await;
        if let Some(e) = chain_err {
            errors.push(format!(
                "check chain '{}': {}",
                transition.check.expression(),
                e
            ));
            transitions.push(TransitionInfo {
                target: transition.target,
                passed: false,
                chain: chain_info,
            });
            continue;
        }
        if !chain_info.passed {
            transitions.push(TransitionInfo {
                target: transition.target,
                passed: false,
                chain: chain_info,
            });
            continue;
        }

        // The candidate. Admission gates entry into maintenance; a denial is
        // visible in the snapshot (chain passed, transition did not) but is
        // not an error.
        if transition.target == MaintenanceState::InMaintenance {
            if let Some(max) = profile.max_parallel {
                match count_in_maintenance(params, &profile.name).await {
                    Ok(count) if count >= max => {
                        debug!(
                            node = %params.node.name,
                            profile = %profile.name,
                            count,
                            max,
                            "transition suppressed by admission"
                        );
                        transitions.push(TransitionInfo {
                            target: transition.target,
                            passed: false,
                            chain: chain_info,
                        });
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        errors.push(format!("admission: {}", e));
                        transitions.push(TransitionInfo {
                            target: transition.target,
                            passed: false,
                            chain: chain_info,
                        });
                        break;
                    }
                }
            }
        }

        match transition.trigger.execute(params).await {
            Ok(()) => {
                if let Err(e) = transition.check.on_transition(params).await {
                    warn!(
                        node = %params.node.name,
                        profile = %profile.name,
                        error = %e,
                        "transition hook failed"
                    );
                    errors.push(format!("on_transition: {}", e));
                }
                entry.state = transition.target;
                if params.now > entry.last_transition {
                    entry.last_transition = params.now;
                }
                metrics::TRANSITIONS_TOTAL
                    .with_label_values(&[
                        profile.name.as_str(),
                        &current.to_string(),
                        &transition.target.to_string(),
                    ])
                    .inc();
                transitioned = Some((current, transition.target));
                transitions.push(TransitionInfo {
                    target: transition.target,
                    passed: true,
                    chain: chain_info,
                });
            }
            Err(e) => {
                metrics::TRANSITION_FAILED_TOTAL
                    .with_label_values(&[profile.name.as_str()])
                    .inc();
                errors.push(format!("trigger: {}", e));
                transitions.push(TransitionInfo {
                    target: transition.target,
                    passed: false,
                    chain: chain_info,
                });
            }
        }
        break;
    }

    ProfileOutcome {
        info: ProfileInfo {
            name: profile.name.to_string(),
            state: entry.state,
            transitions,
        },
        transitioned,
        errors,
    }
}

/// Nodes currently `in-maintenance` for the profile, excluding the candidate
/// itself. Reads the per-node data annotation, falling back to the state
/// label for nodes without a readable record.
async fn count_in_maintenance(
    params: &PluginParams,
    profile: &ProfileName,
) -> Result<u32, ReconcileError> {
    let nodes = params.client.list_nodes().await?;
    let mut count = 0;
    for node in &nodes {
        if node.name == params.node.name {
            continue;
        }
        let in_maintenance = match ProfileData::parse(node.annotation(DATA_ANNOTATION)) {
            Ok(data) if !data.profiles.is_empty() => data
                .entry(profile)
                .map(|e| e.state == MaintenanceState::InMaintenance)
                .unwrap_or(false),
            _ => {
                node.has_label(STATE_LABEL, "in-maintenance")
                    && node.profiles().contains(profile)
            }
        };
        if in_maintenance {
            count += 1;
        }
    }
    Ok(count)
}
