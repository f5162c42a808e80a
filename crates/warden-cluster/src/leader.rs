use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warden_domain::Lease;

use crate::client::ClusterClient;
use crate::error::ClusterError;

/// Lease-based leader election. One lease, compare-and-set writes only; the
/// holder renews every `renew_period`, challengers take over once the renew
/// time is older than `lease_duration`.
pub struct LeaderElector {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_period: Duration,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        LeaderElector {
            client,
            namespace: namespace.into(),
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_period: Duration::from_secs(5),
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timing(mut self, lease_duration: Duration, renew_period: Duration) -> Self {
        self.lease_duration = lease_duration;
        self.renew_period = renew_period;
        self
    }

    /// Shared flag other components consult; flips as leadership changes.
    pub fn leadership(&self) -> Arc<AtomicBool> {
        self.is_leader.clone()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.try_acquire().await {
                Ok(acquired) => {
                    let was = self.is_leader.swap(acquired, Ordering::SeqCst);
                    if acquired && !was {
                        info!(identity = %self.identity, "acquired leadership");
                    } else if !acquired && was {
                        warn!(identity = %self.identity, "lost leadership");
                    }
                }
                Err(e) => {
                    debug!(error = %e, "leader election attempt failed");
                    self.is_leader.store(false, Ordering::SeqCst);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.renew_period) => {}
                _ = shutdown.changed() => {
                    self.is_leader.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool, ClusterError> {
        let now = Utc::now();
        let existing = self
            .client
            .get_lease(&self.namespace, &self.lease_name)
            .await?;

        let mut lease = match existing {
            None => {
                let mut fresh = Lease::new(&self.namespace, &self.lease_name);
                fresh.holder = Some(self.identity.clone());
                fresh.renew_time = Some(now);
                return match self.client.create_lease(&fresh).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_conflict() => Ok(false),
                    Err(e) => Err(e),
                };
            }
            Some(lease) => lease,
        };

        let held_by_us = lease.holder.as_deref() == Some(self.identity.as_str());
        let expired = lease
            .renew_time
            .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default()
                >= self.lease_duration)
            .unwrap_or(true);

        if !held_by_us && !expired {
            return Ok(false);
        }

        lease.holder = Some(self.identity.clone());
        lease.renew_time = Some(now);
        match self.client.update_lease(&lease).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;

    fn elector(cluster: &InMemoryCluster, identity: &str) -> LeaderElector {
        LeaderElector::new(
            Arc::new(cluster.clone()),
            "kube-system",
            "warden-leader",
            identity,
        )
        .with_timing(Duration::from_secs(15), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn first_contender_wins_and_holds() {
        let cluster = InMemoryCluster::new();
        let a = elector(&cluster, "a");
        let b = elector(&cluster, "b");

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        // Renewal by the holder keeps working.
        assert!(a.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let cluster = InMemoryCluster::new();
        let a = elector(&cluster, "a").with_timing(Duration::ZERO, Duration::from_millis(10));
        let b = elector(&cluster, "b").with_timing(Duration::ZERO, Duration::from_millis(10));

        assert!(a.try_acquire().await.unwrap());
        // lease_duration of zero means instantly expired.
        assert!(b.try_acquire().await.unwrap());
        let lease = cluster
            .get_lease("kube-system", "warden-leader")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.holder.as_deref(), Some("b"));
    }
}
