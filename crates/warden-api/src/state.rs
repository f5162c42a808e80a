use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use warden_cluster::ClusterClient;
use warden_reconciler::NodeInfoCache;

/// Remembers when `/metrics` was last scraped. The shutdown path polls this
/// so counters incremented just before the signal are collected once more
/// before the server closes.
#[derive(Clone, Default)]
pub struct ScrapeMonitor {
    last: Arc<Mutex<Option<Instant>>>,
}

impl ScrapeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        let mut guard = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Instant::now());
    }

    pub fn scraped_since(&self, instant: Instant) -> bool {
        let guard = self.last.lock().unwrap_or_else(|e| e.into_inner());
        guard.map_or(false, |last| last >= instant)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<NodeInfoCache>,
    pub client: Arc<dyn ClusterClient>,
    /// Flipped by the leader elector; decides whether `/api/v1/info` serves
    /// locally or proxies to the leader.
    pub is_leader: Arc<AtomicBool>,
    pub http: reqwest::Client,
    /// Namespace and name of the leader-election lease.
    pub lease_namespace: Arc<String>,
    pub lease_name: Arc<String>,
    /// This process's election identity (the pod name).
    pub identity: Arc<String>,
    /// Port peers serve their API on; used when proxying to the leader.
    pub api_port: u16,
    /// Stamped on every `/metrics` request.
    pub scrapes: ScrapeMonitor,
}
