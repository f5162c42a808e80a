use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, warn};
use warden_cluster::ClusterClient;
use warden_config::load_maintenance_config;

use crate::reconcile::Reconciler;

const DEFAULT_PARALLELISM: usize = 5;
const FALLBACK_REQUEUE: Duration = Duration::from_secs(60);

/// Periodic reconciliation loop: every requeue interval (with jitter), list
/// the nodes and reconcile them with bounded parallelism. A pass completes
/// before the next starts, so one node is never reconciled concurrently with
/// itself.
pub struct Runner {
    client: Arc<dyn ClusterClient>,
    reconciler: Arc<Reconciler>,
    config_path: std::path::PathBuf,
    parallelism: usize,
    leadership: Option<Arc<AtomicBool>>,
}

impl Runner {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        reconciler: Arc<Reconciler>,
        config_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Runner {
            client,
            reconciler,
            config_path: config_path.into(),
            parallelism: DEFAULT_PARALLELISM,
            leadership: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Only reconcile while this flag is set; followers idle.
    pub fn with_leadership(mut self, leadership: Arc<AtomicBool>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let leading = self
                .leadership
                .as_ref()
                .map(|flag| flag.load(Ordering::SeqCst))
                .unwrap_or(true);
            if leading {
                self.pass().await;
            }

            let requeue = self.requeue_interval();
            tokio::select! {
                _ = tokio::time::sleep(jittered(requeue)) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One pass over the node set.
    pub async fn pass(&self) {
        let nodes = match self.client.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "node listing failed, skipping pass");
                return;
            }
        };

        let reconciler = self.reconciler.clone();
        stream::iter(nodes.into_iter().map(|node| {
            let reconciler = reconciler.clone();
            async move {
                if let Err(e) = reconciler.reconcile(&node.name).await {
                    warn!(node = %node.name, error = %e, "reconciliation failed");
                }
            }
        }))
        .buffer_unordered(self.parallelism)
        .collect::<Vec<()>>()
        .await;
    }

    fn requeue_interval(&self) -> Duration {
        match load_maintenance_config(&self.config_path) {
            Ok(config) => config.intervals.requeue,
            Err(e) => {
                warn!(error = %e, "config unreadable, using fallback requeue interval");
                FALLBACK_REQUEUE
            }
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(60);
        for _ in 0..100 {
            let jittered = jittered(base);
            assert!(jittered >= base);
            assert!(jittered <= base.mul_f64(1.1));
        }
    }
}
