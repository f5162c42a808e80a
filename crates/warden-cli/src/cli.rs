use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Node maintenance orchestrator for container clusters",
    version
)]
pub struct Args {
    /// Address the metrics/API server binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Address the health probe server binds to.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub health_addr: String,

    /// Run leader election; without it this process assumes leadership.
    #[arg(long)]
    pub enable_leader_election: bool,

    /// Run the hypervisor maintenance controller.
    #[arg(long)]
    pub enable_esx_maintenance: bool,

    /// Run the kubelet-version / node-deletion controller.
    #[arg(long)]
    pub enable_kubernikus_maintenance: bool,

    /// Kubeconfig context to use instead of the inferred configuration.
    #[arg(long)]
    pub kubecontext: Option<String>,

    /// Directory holding maintenance.yaml, esx.yaml and kubernikus.yaml.
    #[arg(long, default_value = "./config")]
    pub config_dir: PathBuf,

    /// Directory of dashboard files served under /static.
    #[arg(long, default_value = "./static")]
    pub static_dir: PathBuf,

    /// Namespace of the election lease and this process's pod.
    #[arg(long, env = "WARDEN_NAMESPACE", default_value = "kube-system")]
    pub namespace: String,

    /// How long to keep serving after a shutdown signal while waiting for
    /// one final metrics scrape.
    #[arg(long, default_value = "15s", value_parser = humantime::parse_duration)]
    pub shutdown_scrape_window: Duration,
}
