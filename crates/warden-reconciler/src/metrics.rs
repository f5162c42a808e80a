use std::sync::LazyLock;

use prometheus::{
    register_counter_vec, register_int_counter_vec, CounterVec, IntCounterVec,
};
use warden_domain::Pod;

/// Pods likely displaced by putting their node into maintenance.
pub static POD_SHUFFLE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pod_shuffle_count",
        "Pods evicted as a side effect of node maintenance",
        &["owner", "profile"]
    )
    .expect("pod_shuffle_count registration")
});

/// Shuffles normalized by the replica count of the owning workload: a value
/// near 1.0 means a whole workload was displaced at once.
pub static POD_SHUFFLES_PER_REPLICA: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "pod_shuffles_per_replica",
        "Pod shuffles normalized by owner replica count",
        &["owner", "profile"]
    )
    .expect("pod_shuffles_per_replica registration")
});

pub static TRANSITIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "maintenance_transitions_total",
        "Committed maintenance state transitions",
        &["profile", "from", "to"]
    )
    .expect("maintenance_transitions_total registration")
});

pub static TRANSITION_FAILED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "maintenance_transition_failed_total",
        "Transitions whose trigger chain failed",
        &["profile"]
    )
    .expect("maintenance_transition_failed_total registration")
});

/// Record the drain impact of a node entering maintenance. Mirror pods and
/// DaemonSet pods stay put and are not counted.
pub fn record_shuffles(pods: &[Pod], profile: &str) {
    for pod in pods {
        if pod.is_mirror() || pod.owned_by_daemonset() {
            continue;
        }
        let owner = pod.owner_key();
        POD_SHUFFLE_COUNT
            .with_label_values(&[&owner, profile])
            .inc();
        let replicas = pod
            .owner
            .as_ref()
            .and_then(|o| o.replicas)
            .filter(|r| *r > 0)
            .unwrap_or(1);
        POD_SHUFFLES_PER_REPLICA
            .with_label_values(&[&owner, profile])
            .inc_by(1.0 / replicas as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_domain::{NodeName, OwnerRef};

    fn pod(name: &str, owner: Option<OwnerRef>) -> Pod {
        Pod {
            namespace: "default".into(),
            name: name.into(),
            uid: name.into(),
            node_name: Some(NodeName::new("n1")),
            ip: None,
            annotations: Default::default(),
            deletion_timestamp: None,
            owner,
        }
    }

    #[test]
    fn shuffle_metrics_skip_daemonsets_and_normalize_by_replicas() {
        let owned = pod(
            "web-1",
            Some(OwnerRef {
                kind: "Deployment".into(),
                name: "web".into(),
                replicas: Some(4),
            }),
        );
        let daemon = pod(
            "fluentd-1",
            Some(OwnerRef {
                kind: "DaemonSet".into(),
                name: "fluentd".into(),
                replicas: None,
            }),
        );

        let owner_key = owned.owner_key();
        let before = POD_SHUFFLE_COUNT
            .with_label_values(&[&owner_key, "shuffle-test"])
            .get();
        record_shuffles(&[owned, daemon], "shuffle-test");

        assert_eq!(
            POD_SHUFFLE_COUNT
                .with_label_values(&[&owner_key, "shuffle-test"])
                .get(),
            before + 1
        );
        let per_replica = POD_SHUFFLES_PER_REPLICA
            .with_label_values(&[&owner_key, "shuffle-test"])
            .get();
        assert!((per_replica - 0.25).abs() < f64::EPSILON);
        assert_eq!(
            POD_SHUFFLE_COUNT
                .with_label_values(&["default/DaemonSet/fluentd", "shuffle-test"])
                .get(),
            0
        );
    }
}
