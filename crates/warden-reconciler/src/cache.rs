use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use warden_domain::NodeInfo;

/// In-memory `node name → NodeInfo` map behind a single mutex.
///
/// One writer (the reconciler) and many readers (the HTTP handlers). The JSON
/// snapshot clones the values under the lock and serializes outside it, so a
/// slow encoder never blocks reconciliation.
#[derive(Debug, Default)]
pub struct NodeInfoCache {
    inner: Mutex<HashMap<String, NodeInfo>>,
}

impl NodeInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `info.node_name`, stamping `updated`.
    pub fn update(&self, mut info: NodeInfo) {
        info.updated = Utc::now();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(info.node_name.clone(), info);
    }

    pub fn delete(&self, node_name: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(node_name);
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, node_name: &str) -> Option<NodeInfo> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(node_name).cloned()
    }

    /// Serialize the current contents as a JSON array. Order is unspecified;
    /// readers never see a partially applied update.
    pub fn json_snapshot(&self) -> Result<String, serde_json::Error> {
        let values: Vec<NodeInfo> = {
            let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.values().cloned().collect()
        };
        serde_json::to_string(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_domain::MaintenanceState;

    fn info(name: &str) -> NodeInfo {
        NodeInfo {
            node_name: name.into(),
            updated: Utc::now(),
            labels: Default::default(),
            profiles: vec![warden_domain::ProfileInfo {
                name: "default".into(),
                state: MaintenanceState::Operational,
                transitions: vec![],
            }],
        }
    }

    #[test]
    fn size_tracks_distinct_nodes_and_delete_drops() {
        let cache = NodeInfoCache::new();
        cache.update(info("a"));
        cache.update(info("b"));
        cache.update(info("a"));
        assert_eq!(cache.len(), 2);

        cache.delete("a");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn snapshot_is_well_formed_json() {
        let cache = NodeInfoCache::new();
        cache.update(info("a"));
        cache.update(info("b"));

        let snapshot = cache.json_snapshot().unwrap();
        let parsed: Vec<NodeInfo> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn concurrent_updates_and_snapshots_do_not_tear() {
        let cache = Arc::new(NodeInfoCache::new());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    cache.update(info(&format!("node-{}", i % 10)));
                }
            })
        };
        let reader = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = cache.json_snapshot().unwrap();
                    let parsed: Vec<NodeInfo> = serde_json::from_str(&snapshot).unwrap();
                    assert!(parsed.len() <= 10);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(cache.len(), 10);
    }
}
