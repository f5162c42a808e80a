use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use warden_domain::{NodeName, Pod};

use crate::client::{ClusterClient, EvictionStyle};
use crate::error::ClusterError;

#[derive(Debug, Clone)]
pub struct DrainParams {
    pub eviction_period: Duration,
    pub eviction_timeout: Duration,
    /// Fall back to deletion when eviction keeps getting rejected.
    pub force_eviction: bool,
    pub deletion_period: Duration,
    pub deletion_timeout: Duration,
    /// `Some(0)` force-deletes; `None` uses the pod's own grace period.
    pub grace_period: Option<i64>,
}

/// Pick the eviction endpoint for an API server version string like
/// `"1.24.3"` or `"v1.21.0+vmware"`. `None` means direct deletion.
pub fn eviction_style(version: &str) -> Result<Option<EvictionStyle>, ClusterError> {
    let trimmed = version.trim_start_matches('v');
    let numeric: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.');
    let major: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ClusterError::Version(version.to_string()))?;
    let minor: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ClusterError::Version(version.to_string()))?;

    let style = if major > 1 || (major == 1 && minor >= 22) {
        Some(EvictionStyle::PolicyV1)
    } else if major == 1 && minor >= 6 {
        Some(EvictionStyle::PolicyV1beta1)
    } else {
        None
    };
    Ok(style)
}

/// Drain one node: evict (or delete) every pod that is not a mirror pod and
/// not owned by a DaemonSet, then wait for all of them to be gone.
///
/// Returns `Ok(true)` when the node is drained, `Ok(false)` when pods are
/// still terminating; the caller retries later without treating that as an
/// error. Per-pod failures never cancel the other pods; all errors are
/// collected and joined.
pub async fn ensure_drain(
    client: &Arc<dyn ClusterClient>,
    node: &NodeName,
    params: &DrainParams,
) -> Result<bool, ClusterError> {
    let pods: Vec<Pod> = client
        .list_pods_on_node(node)
        .await?
        .into_iter()
        .filter(|p| !p.is_mirror() && !p.owned_by_daemonset())
        .collect();
    if pods.is_empty() {
        return Ok(true);
    }

    let style = eviction_style(&client.server_version().await?)?;
    let (active, terminating): (Vec<Pod>, Vec<Pod>) =
        pods.into_iter().partition(|p| !p.is_terminating());

    debug!(
        node = %node,
        active = active.len(),
        terminating = terminating.len(),
        "draining node"
    );

    let mut errors: Vec<String> = Vec::new();

    // Evictions run in parallel; one pod blocking on its disruption budget
    // must not hold up the rest.
    let eviction_results = join_all(
        active
            .iter()
            .map(|pod| evict_with_retry(client, pod, style, params)),
    )
    .await;
    for (pod, result) in active.iter().zip(eviction_results) {
        if let Err(e) = result {
            errors.push(format!("evict {}/{}: {}", pod.namespace, pod.name, e));
        }
    }

    // Wait for every pod to disappear, evicted and already-terminating alike.
    let mut timed_out = false;
    let all: Vec<&Pod> = active.iter().chain(terminating.iter()).collect();
    let wait_results = join_all(
        all.iter()
            .map(|pod| await_deletion(client, pod, params)),
    )
    .await;
    for (pod, result) in all.iter().zip(wait_results) {
        match result {
            Ok(true) => {}
            Ok(false) => timed_out = true,
            Err(e) => errors.push(format!("await {}/{}: {}", pod.namespace, pod.name, e)),
        }
    }

    if !errors.is_empty() {
        return Err(ClusterError::Drain(errors.join("\n")));
    }
    Ok(!timed_out)
}

/// Evict one pod, retrying until `eviction_timeout`. Falls back to deletion
/// when `force_eviction` is set or the server predates eviction entirely.
async fn evict_with_retry(
    client: &Arc<dyn ClusterClient>,
    pod: &Pod,
    style: Option<EvictionStyle>,
    params: &DrainParams,
) -> Result<(), ClusterError> {
    let style = match style {
        Some(style) => style,
        None => return client.delete_pod(pod, params.grace_period).await,
    };

    let deadline = Instant::now() + params.eviction_timeout;
    loop {
        match client.evict_pod(pod, params.grace_period, style).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable_eviction() && Instant::now() < deadline => {
                sleep(params.eviction_period).await;
            }
            Err(e) => {
                if params.force_eviction {
                    warn!(
                        pod = %pod.name,
                        namespace = %pod.namespace,
                        error = %e,
                        "eviction failed, falling back to delete"
                    );
                    return client.delete_pod(pod, params.grace_period).await;
                }
                return Err(e);
            }
        }
    }
}

/// Poll until the pod is gone or replaced (UID changed). `Ok(false)` on
/// timeout.
async fn await_deletion(
    client: &Arc<dyn ClusterClient>,
    pod: &Pod,
    params: &DrainParams,
) -> Result<bool, ClusterError> {
    let deadline = Instant::now() + params.deletion_timeout;
    loop {
        match client.get_pod(&pod.namespace, &pod.name).await? {
            None => return Ok(true),
            Some(current) if current.uid != pod.uid => return Ok(true),
            Some(_) => {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                sleep(params.deletion_period).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;
    use std::collections::BTreeMap;
    use warden_domain::OwnerRef;

    fn short_params(force: bool) -> DrainParams {
        DrainParams {
            eviction_period: Duration::from_millis(5),
            eviction_timeout: Duration::from_millis(30),
            force_eviction: force,
            deletion_period: Duration::from_millis(5),
            deletion_timeout: Duration::from_millis(100),
            grace_period: None,
        }
    }

    fn pod(name: &str, node: &str) -> Pod {
        Pod {
            namespace: "default".into(),
            name: name.into(),
            uid: format!("uid-{}", name),
            node_name: Some(NodeName::new(node)),
            ip: None,
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
            owner: None,
        }
    }

    #[test]
    fn eviction_style_follows_server_version() {
        assert_eq!(eviction_style("1.5.0").unwrap(), None);
        assert_eq!(
            eviction_style("1.21.0").unwrap(),
            Some(EvictionStyle::PolicyV1beta1)
        );
        assert_eq!(
            eviction_style("1.24.0").unwrap(),
            Some(EvictionStyle::PolicyV1)
        );
        assert_eq!(
            eviction_style("v1.22.3+build").unwrap(),
            Some(EvictionStyle::PolicyV1)
        );
        assert!(eviction_style("nonsense").is_err());
    }

    #[tokio::test]
    async fn drains_plain_pods_and_spares_mirror_and_daemonset_pods() {
        let cluster = InMemoryCluster::new();
        let node = NodeName::new("n1");

        cluster.insert_pod(pod("web-0", "n1")).await;

        let mut mirror = pod("static-web", "n1");
        mirror.annotations.insert(
            warden_domain::MIRROR_POD_ANNOTATION.into(),
            "hash".into(),
        );
        cluster.insert_pod(mirror).await;

        let mut ds = pod("fluentd-abc", "n1");
        ds.owner = Some(OwnerRef {
            kind: "DaemonSet".into(),
            name: "fluentd".into(),
            replicas: None,
        });
        cluster.insert_pod(ds).await;

        let client: Arc<dyn ClusterClient> = Arc::new(cluster.clone());
        let drained = ensure_drain(&client, &node, &short_params(false))
            .await
            .unwrap();
        assert!(drained);

        let remaining = cluster.pods().await;
        let names: Vec<&str> = remaining.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"static-web"));
        assert!(names.contains(&"fluentd-abc"));
        assert!(!names.contains(&"web-0"));
    }

    #[tokio::test]
    async fn blocked_eviction_without_force_is_an_error() {
        let cluster = InMemoryCluster::new();
        cluster.insert_pod(pod("web-0", "n1")).await;
        cluster.block_eviction("default", "web-0").await;

        let client: Arc<dyn ClusterClient> = Arc::new(cluster.clone());
        let err = ensure_drain(&client, &NodeName::new("n1"), &short_params(false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("web-0"));
    }

    #[tokio::test]
    async fn blocked_eviction_with_force_falls_back_to_delete() {
        let cluster = InMemoryCluster::new();
        cluster.insert_pod(pod("web-0", "n1")).await;
        cluster.block_eviction("default", "web-0").await;

        let client: Arc<dyn ClusterClient> = Arc::new(cluster.clone());
        let drained = ensure_drain(&client, &NodeName::new("n1"), &short_params(true))
            .await
            .unwrap();
        assert!(drained);
        assert!(cluster.pods().await.is_empty());
    }

    #[tokio::test]
    async fn old_server_version_uses_direct_delete() {
        let cluster = InMemoryCluster::new();
        cluster.set_server_version("1.5.0").await;
        cluster.insert_pod(pod("web-0", "n1")).await;
        // Eviction is blocked, but 1.5.0 never evicts, so the drain succeeds.
        cluster.block_eviction("default", "web-0").await;

        let client: Arc<dyn ClusterClient> = Arc::new(cluster.clone());
        let drained = ensure_drain(&client, &NodeName::new("n1"), &short_params(false))
            .await
            .unwrap();
        assert!(drained);
    }
}
