use std::path::PathBuf;

use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/info", get(handlers::node_infos));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use warden_cluster::{ClusterClient, InMemoryCluster};
    use warden_domain::{Lease, MaintenanceState, NodeInfo, Pod, ProfileInfo};
    use warden_reconciler::NodeInfoCache;

    fn test_state(cluster: InMemoryCluster, leader: bool) -> AppState {
        AppState {
            cache: Arc::new(NodeInfoCache::new()),
            client: Arc::new(cluster) as Arc<dyn ClusterClient>,
            is_leader: Arc::new(AtomicBool::new(leader)),
            http: reqwest::Client::new(),
            lease_namespace: Arc::new("kube-system".to_string()),
            lease_name: Arc::new("warden-leader".to_string()),
            identity: Arc::new("self-pod".to_string()),
            api_port: 0,
            scrapes: crate::state::ScrapeMonitor::new(),
        }
    }

    fn info(name: &str) -> NodeInfo {
        NodeInfo {
            node_name: name.into(),
            updated: Utc::now(),
            labels: Default::default(),
            profiles: vec![ProfileInfo {
                name: "default".into(),
                state: MaintenanceState::Operational,
                transitions: vec![],
            }],
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = build_app(test_state(InMemoryCluster::new(), true), None);
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exposes_registered_counters() {
        warden_reconciler::metrics::TRANSITIONS_TOTAL
            .with_label_values(&["metrics-test", "operational", "maintenance-required"])
            .inc();

        let app = build_app(test_state(InMemoryCluster::new(), true), None);
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("maintenance_transitions_total"));
    }

    #[tokio::test]
    async fn metrics_requests_are_seen_by_the_scrape_monitor() {
        let state = test_state(InMemoryCluster::new(), true);
        let monitor = state.scrapes.clone();
        let before = std::time::Instant::now();
        assert!(!monitor.scraped_since(before));

        let app = build_app(state, None);
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(monitor.scraped_since(before));
    }

    #[tokio::test]
    async fn leader_serves_the_local_cache() {
        let state = test_state(InMemoryCluster::new(), true);
        state.cache.update(info("n1"));

        let app = build_app(state, None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json[0]["nodeName"], "n1");
    }

    #[tokio::test]
    async fn follower_without_a_lease_returns_unavailable() {
        let app = build_app(test_state(InMemoryCluster::new(), false), None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn follower_proxies_to_the_leader() {
        // The leader: a real listener serving its cache.
        let leader_cluster = InMemoryCluster::new();
        let leader_state = test_state(leader_cluster, true);
        leader_state.cache.update(info("n1"));
        leader_state.cache.update(info("n2"));
        let leader_app = build_app(leader_state, None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let leader_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, leader_app).await.unwrap();
        });

        // The follower knows the leader only through the lease and pod ip.
        let cluster = InMemoryCluster::new();
        let mut lease = Lease::new("kube-system", "warden-leader");
        lease.holder = Some("leader-pod".to_string());
        cluster.create_lease(&lease).await.unwrap();
        cluster
            .insert_pod(Pod {
                namespace: "kube-system".into(),
                name: "leader-pod".into(),
                uid: "u1".into(),
                node_name: None,
                ip: Some("127.0.0.1".into()),
                annotations: Default::default(),
                deletion_timestamp: None,
                owner: None,
            })
            .await;

        let mut follower_state = test_state(cluster, false);
        follower_state.api_port = leader_port;
        let follower_app = build_app(follower_state, None);

        let resp = follower_app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn follower_refuses_to_proxy_to_itself() {
        let cluster = InMemoryCluster::new();
        let mut lease = Lease::new("kube-system", "warden-leader");
        lease.holder = Some("self-pod_0000".to_string());
        cluster.create_lease(&lease).await.unwrap();

        let state = test_state(cluster, false);
        let app = build_app(state, None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
