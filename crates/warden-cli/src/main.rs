mod cli;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_api::{build_app, AppState, ScrapeMonitor};
use warden_cluster::{ClusterClient, KubeCluster, LeaderElector};
use warden_config::{load_esx_config, load_kubernikus_config};
use warden_esx::{EsxCoordinator, VCenterPool};
use warden_kubernikus::{coordinator::resolve_credentials, KubernikusCoordinator, OpenStackClient};
use warden_reconciler::{NodeInfoCache, Reconciler, Runner};

const LEADER_LEASE_NAME: &str = "warden-leader-election";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let kube_client = build_kube_client(args.kubecontext.clone())
        .await
        .context("building cluster client")?;
    let client: Arc<dyn ClusterClient> = Arc::new(KubeCluster::new(kube_client));
    let cache = Arc::new(NodeInfoCache::new());

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "warden".to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let is_leader = if args.enable_leader_election {
        let elector = LeaderElector::new(
            client.clone(),
            &args.namespace,
            LEADER_LEASE_NAME,
            &identity,
        );
        let leadership = elector.leadership();
        tokio::spawn(elector.run(shutdown_rx.clone()));
        leadership
    } else {
        Arc::new(AtomicBool::new(true))
    };

    let maintenance_config = args.config_dir.join("maintenance.yaml");
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        cache.clone(),
        &maintenance_config,
    ));
    let runner = Runner::new(client.clone(), reconciler, &maintenance_config)
        .with_leadership(is_leader.clone());
    tokio::spawn(runner.run(shutdown_rx.clone()));

    if args.enable_esx_maintenance {
        let esx_config_path = args.config_dir.join("esx.yaml");
        let esx_config =
            load_esx_config(&esx_config_path).context("loading esx configuration")?;
        let pool = Arc::new(VCenterPool::new(esx_config.v_centers.clone()));
        let coordinator = EsxCoordinator::new(client.clone(), pool, &esx_config_path);
        tokio::spawn(coordinator.run(is_leader.clone(), shutdown_rx.clone()));
        info!("esx maintenance controller enabled");
    }

    if args.enable_kubernikus_maintenance {
        let kubernikus_config_path = args.config_dir.join("kubernikus.yaml");
        let kubernikus_config = load_kubernikus_config(&kubernikus_config_path)
            .context("loading kubernikus configuration")?;
        let credentials = resolve_credentials(&client, &kubernikus_config)
            .await
            .context("resolving openstack credentials")?;
        let cloud = Arc::new(OpenStackClient::new(credentials));
        let coordinator =
            KubernikusCoordinator::new(client.clone(), cloud, &kubernikus_config_path);
        tokio::spawn(coordinator.run(is_leader.clone(), shutdown_rx.clone()));
        info!("kubernikus maintenance controller enabled");
    }

    let api_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("parsing metrics address")?;
    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .context("parsing health address")?;

    let scrapes = ScrapeMonitor::new();
    let state = AppState {
        cache,
        client,
        is_leader,
        http: reqwest::Client::new(),
        lease_namespace: Arc::new(args.namespace.clone()),
        lease_name: Arc::new(LEADER_LEASE_NAME.to_string()),
        identity: Arc::new(identity),
        api_port: api_addr.port(),
        scrapes: scrapes.clone(),
    };

    let static_dir = args.static_dir.exists().then(|| args.static_dir.clone());
    let app = build_app(state.clone(), static_dir);
    let health_app = build_app(state, None);

    // The servers stop on this channel, not on the shutdown signal itself:
    // they stay up through the final-scrape window below.
    let (server_stop_tx, server_stop_rx) = watch::channel(false);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .context("binding health address")?;
    let mut health_stop = server_stop_rx.clone();
    tokio::spawn(async move {
        let serve = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(async move {
                let _ = health_stop.changed().await;
            });
        if let Err(e) = serve.await {
            error!(error = %e, "health server failed");
        }
    });

    let listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .context("binding metrics address")?;
    info!(addr = %api_addr, "serving metrics and api");

    let mut api_stop = server_stop_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_stop.changed().await;
            })
            .await
    });

    let mut shutdown = shutdown_rx.clone();
    let _ = shutdown.changed().await;

    // Keep serving until one more scrape lands, so transition counters
    // incremented just before the signal are not lost. Bounded by the
    // configured window.
    let signal_time = Instant::now();
    let deadline = signal_time + args.shutdown_scrape_window;
    while Instant::now() < deadline && !scrapes.scraped_since(signal_time) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    if !scrapes.scraped_since(signal_time) {
        warn!(
            window = ?args.shutdown_scrape_window,
            "no final metrics scrape observed within the shutdown window"
        );
    }
    let _ = server_stop_tx.send(true);

    // Graceful close blocks at most five seconds.
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e).context("serving api"),
        Ok(Err(e)) => return Err(e).context("api server task"),
        Err(_) => warn!("graceful server close timed out"),
    }

    info!("shut down cleanly");
    Ok(())
}

async fn build_kube_client(context: Option<String>) -> Result<kube::Client> {
    let config = match context {
        Some(context) => {
            let options = kube::config::KubeConfigOptions {
                context: Some(context),
                ..Default::default()
            };
            kube::Config::from_kubeconfig(&options).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(kube::Client::try_from(config)?)
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
    let _ = tx.send(true);
}
