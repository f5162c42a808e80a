use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use warden_cluster::{ensure_drain, ClusterClient, DrainParams, NodePatch};
use warden_config::{load_esx_config, EsxConfig};
use warden_domain::{
    Node, ESX_IN_MAINTENANCE_LABEL, ESX_REBOOT_INITIATED_ANNOTATION, ESX_REBOOT_OK_LABEL,
    ESX_VERSION_LABEL,
};

use crate::client::{HostApi, HostApiPool, VmPowerState};
use crate::error::EsxError;
use crate::host::{group_hosts, Host, HostMaintenance};

/// Coordinates VM shutdown and startup for hosts entering or leaving
/// maintenance. Runs on the leader only; all cross-cycle state lives in node
/// labels and annotations.
pub struct EsxCoordinator {
    client: Arc<dyn ClusterClient>,
    pool: Arc<dyn HostApiPool>,
    config_path: PathBuf,
}

impl EsxCoordinator {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        pool: Arc<dyn HostApiPool>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        EsxCoordinator {
            client,
            pool,
            config_path: config_path.into(),
        }
    }

    /// Timer loop with jitter; cycles are skipped while not leading.
    pub async fn run(self, is_leader: Arc<AtomicBool>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let period = self.cycle_period();
            tokio::select! {
                _ = sleep(period) => {}
                _ = shutdown.changed() => return,
            }
            if !is_leader.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "esx maintenance cycle failed");
            }
        }
    }

    fn cycle_period(&self) -> Duration {
        match load_esx_config(&self.config_path) {
            Ok(config) => {
                let jitter = config.intervals.check.jitter.clamp(0.0, 1.0);
                let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
                config.intervals.check.period.mul_f64(factor.max(0.0))
            }
            Err(e) => {
                warn!(error = %e, "esx config unreadable, using fallback period");
                Duration::from_secs(300)
            }
        }
    }

    /// One full pass: group hosts, refresh labels, start or shut down VMs.
    /// A failing host or node logs and never blocks its peers.
    pub async fn run_cycle(&self) -> Result<(), EsxError> {
        let config = load_esx_config(&self.config_path)?;
        let nodes = self.client.list_nodes().await?;
        let hosts = group_hosts(nodes);

        for host in &hosts {
            if let Err(e) = self.process_host(&config, host).await {
                warn!(
                    host = %host.name,
                    availability_zone = %host.availability_zone,
                    error = %e,
                    "host processing failed"
                );
            }
        }

        self.pool.end_cycle().await;
        Ok(())
    }

    async fn process_host(&self, config: &EsxConfig, host: &Host) -> Result<(), EsxError> {
        let api = self.pool.for_zone(&host.availability_zone).await?;

        match api.host_version(&host.name).await {
            Ok(version) => {
                self.label_nodes(host, ESX_VERSION_LABEL, &version).await;
            }
            Err(e) => warn!(host = %host.name, error = %e, "host version unavailable"),
        }

        let state = check_maintenance(api.as_ref(), config, &host.name).await;
        debug!(
            host = %host.name,
            availability_zone = %host.availability_zone,
            state = %state,
            "host maintenance state"
        );
        // An unknown state changes nothing: the previous labels stay until
        // the HV gives a definitive answer.
        if state != HostMaintenance::Unknown {
            self.label_nodes(host, ESX_IN_MAINTENANCE_LABEL, state.label_value())
                .await;
        }

        if state.shutdown_permitted() {
            self.shutdown_nodes(config, api.as_ref(), host, state).await;
        } else if state == HostMaintenance::NotRequired {
            self.start_nodes(api.as_ref(), host).await;
        }
        Ok(())
    }

    /// Patch a label on every node of the host, skipping nodes that already
    /// carry the value.
    async fn label_nodes(&self, host: &Host, key: &str, value: &str) {
        for node in &host.nodes {
            if node.label(key) == Some(value) {
                continue;
            }
            let patch = NodePatch::new().set_label(key, value);
            if let Err(e) = self.client.patch_node(&node.name, &patch).await {
                warn!(node = %node.name, host = %host.name, error = %e, "label patch failed");
            }
        }
    }

    /// Power up VMs this controller shut down, once the host left
    /// maintenance.
    async fn start_nodes(&self, api: &dyn HostApi, host: &Host) {
        for node in &host.nodes {
            if node.annotation(ESX_REBOOT_INITIATED_ANNOTATION) != Some("true") {
                continue;
            }
            if let Err(e) = self.start_node(api, node).await {
                warn!(
                    node = %node.name,
                    host = %host.name,
                    availability_zone = %host.availability_zone,
                    error = %e,
                    "node start failed"
                );
            }
        }
    }

    async fn start_node(&self, api: &dyn HostApi, node: &Node) -> Result<(), EsxError> {
        info!(node = %node.name, "powering VM back on");
        api.power_on(node.name.as_str()).await?;
        let patch = NodePatch::new()
            .unschedulable(false)
            .remove_annotation(ESX_REBOOT_INITIATED_ANNOTATION);
        self.client.patch_node(&node.name, &patch).await?;
        Ok(())
    }

    /// Shut down every opted-in node on a host under maintenance. All
    /// eligible nodes follow the same decision within one cycle.
    async fn shutdown_nodes(
        &self,
        config: &EsxConfig,
        api: &dyn HostApi,
        host: &Host,
        state: HostMaintenance,
    ) {
        for node in &host.nodes {
            if node.label(ESX_REBOOT_OK_LABEL) != Some("true") {
                continue;
            }
            if let Err(e) = self.shutdown_node(config, api, node, state).await {
                warn!(
                    node = %node.name,
                    host = %host.name,
                    availability_zone = %host.availability_zone,
                    error = %e,
                    "node shutdown failed"
                );
            }
        }
    }

    async fn shutdown_node(
        &self,
        config: &EsxConfig,
        api: &dyn HostApi,
        node: &Node,
        state: HostMaintenance,
    ) -> Result<(), EsxError> {
        let initiated = node.annotation(ESX_REBOOT_INITIATED_ANNOTATION) == Some("true");
        if initiated
            && api.vm_power_state(node.name.as_str()).await? == VmPowerState::PoweredOff
        {
            return Ok(());
        }

        let mut patch = NodePatch::new().unschedulable(true);
        if !initiated {
            patch = patch.set_annotation(ESX_REBOOT_INITIATED_ANNOTATION, "true");
        }
        self.client.patch_node(&node.name, &patch).await?;

        // An alarmed host may die at any moment; skip the grace period.
        let alarmed = state == HostMaintenance::Alarm;
        let params = DrainParams {
            eviction_period: config.intervals.pod_eviction.period,
            eviction_timeout: config.intervals.pod_eviction.timeout,
            force_eviction: config.intervals.pod_eviction.force || alarmed,
            deletion_period: config.intervals.pod_deletion.period,
            deletion_timeout: config.intervals.pod_deletion.timeout,
            grace_period: if alarmed { Some(0) } else { None },
        };
        let drained = ensure_drain(&self.client, &node.name, &params).await?;
        if !drained {
            info!(node = %node.name, "still draining, retrying next cycle");
            return Ok(());
        }

        info!(node = %node.name, "powering VM off");
        api.power_off(node.name.as_str()).await?;
        self.await_power_off(config, api, node.name.as_str()).await
    }

    async fn await_power_off(
        &self,
        config: &EsxConfig,
        api: &dyn HostApi,
        vm: &str,
    ) -> Result<(), EsxError> {
        let deadline = Instant::now() + config.intervals.vm_shutdown.timeout;
        loop {
            if api.vm_power_state(vm).await? == VmPowerState::PoweredOff {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EsxError::ShutdownTimeout(vm.to_string()));
            }
            sleep(config.intervals.vm_shutdown.period).await;
        }
    }
}

/// Derive the host's maintenance state. Maintenance mode or a *running*
/// EnterMaintenance task mean `in`; a configured alarm means `alarm`; an HV
/// error means `unknown`.
async fn check_maintenance(
    api: &dyn HostApi,
    config: &EsxConfig,
    host: &str,
) -> HostMaintenance {
    let runtime = match api.host_runtime(host).await {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(host = %host, error = %e, "host runtime unavailable");
            return HostMaintenance::Unknown;
        }
    };
    if runtime.in_maintenance_mode
        || runtime
            .running_tasks
            .iter()
            .any(|task| task.contains("EnterMaintenance"))
    {
        return HostMaintenance::InMaintenance;
    }

    let alarms = match api.host_alarms(host).await {
        Ok(alarms) => alarms,
        Err(e) => {
            warn!(host = %host, error = %e, "host alarms unavailable");
            return HostMaintenance::Unknown;
        }
    };
    if alarms.iter().any(|alarm| config.alarms.contains(alarm)) {
        HostMaintenance::Alarm
    } else {
        HostMaintenance::NotRequired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimHostApi, SimPool};
    use std::collections::BTreeMap;
    use std::io::Write;
    use warden_cluster::InMemoryCluster;
    use warden_domain::{NodeName, Pod, FAILURE_DOMAIN_LABEL, HOST_LABEL};

    fn esx_config() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
intervals:
  check:
    jitter: 0.1
    period: 1s
  podDeletion:
    period: 5ms
    timeout: 100ms
  podEviction:
    period: 5ms
    timeout: 50ms
    force: false
  vmShutdown:
    period: 5ms
    timeout: 100ms
alarms:
- "Host hardware fault"
vCenters:
  templateUrl: https://vc-$AZ.example.net
  credentials:
    a:
      username: robot
      password: secret
"#,
        )
        .unwrap();
        file
    }

    fn node_on(name: &str, host: &str, reboot_ok: bool) -> Node {
        let mut node = Node::new(name);
        node.labels.insert(HOST_LABEL.into(), host.into());
        node.labels
            .insert(FAILURE_DOMAIN_LABEL.into(), "eu-de-1a".into());
        if reboot_ok {
            node.labels
                .insert(ESX_REBOOT_OK_LABEL.into(), "true".into());
        }
        node
    }

    fn pod_on(name: &str, node: &str) -> Pod {
        Pod {
            namespace: "default".into(),
            name: name.into(),
            uid: name.into(),
            node_name: Some(NodeName::new(node)),
            ip: None,
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
            owner: None,
        }
    }

    struct Fixture {
        cluster: InMemoryCluster,
        sim: SimHostApi,
        coordinator: EsxCoordinator,
        _config: tempfile::NamedTempFile,
    }

    fn fixture() -> Fixture {
        let config = esx_config();
        let cluster = InMemoryCluster::new();
        let sim = SimHostApi::new();
        let coordinator = EsxCoordinator::new(
            Arc::new(cluster.clone()),
            Arc::new(SimPool::new(sim.clone())),
            config.path(),
        );
        Fixture {
            cluster,
            sim,
            coordinator,
            _config: config,
        }
    }

    async fn get(cluster: &InMemoryCluster, name: &str) -> Node {
        cluster.get_node(&NodeName::new(name)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn host_maintenance_shuts_down_opted_in_nodes_and_restores_them() {
        let fx = fixture();
        fx.cluster.insert_node(node_on("n1", "h0", true)).await;
        fx.cluster.insert_node(node_on("n2", "h0", true)).await;
        fx.cluster.insert_node(node_on("n3", "h1", true)).await;
        fx.cluster.insert_pod(pod_on("web-0", "n1")).await;
        fx.sim.set_maintenance("h0", true).await;
        fx.sim.set_version("h0", "7.0.3-21053776").await;

        fx.coordinator.run_cycle().await.unwrap();

        for name in ["n1", "n2"] {
            let node = get(&fx.cluster, name).await;
            assert_eq!(
                node.annotation(ESX_REBOOT_INITIATED_ANNOTATION),
                Some("true")
            );
            assert!(node.unschedulable);
            assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("true"));
            assert_eq!(
                fx.sim.power_state_of(name).await,
                Some(VmPowerState::PoweredOff)
            );
        }
        let node = get(&fx.cluster, "n1").await;
        assert_eq!(node.label(ESX_VERSION_LABEL), Some("7.0.3-21053776"));
        // The drained pod is gone.
        assert!(fx.cluster.get_pod("default", "web-0").await.unwrap().is_none());

        // The other host is untouched.
        let n3 = get(&fx.cluster, "n3").await;
        assert_eq!(n3.annotation(ESX_REBOOT_INITIATED_ANNOTATION), None);
        assert!(!n3.unschedulable);
        assert_eq!(n3.label(ESX_IN_MAINTENANCE_LABEL), Some("false"));
        assert_eq!(fx.sim.power_state_of("n3").await, None);

        // Maintenance ends: VMs power on, nodes uncordon, annotations clear.
        fx.sim.set_maintenance("h0", false).await;
        fx.coordinator.run_cycle().await.unwrap();

        for name in ["n1", "n2"] {
            let node = get(&fx.cluster, name).await;
            assert_eq!(node.annotation(ESX_REBOOT_INITIATED_ANNOTATION), None);
            assert!(!node.unschedulable);
            assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("false"));
            assert_eq!(fx.sim.power_state_of(name).await, Some(VmPowerState::PoweredOn));
        }
    }

    #[tokio::test]
    async fn node_without_opt_in_is_left_alone() {
        let fx = fixture();
        fx.cluster.insert_node(node_on("n1", "h0", false)).await;
        fx.sim.set_maintenance("h0", true).await;

        fx.coordinator.run_cycle().await.unwrap();

        let node = get(&fx.cluster, "n1").await;
        assert_eq!(node.annotation(ESX_REBOOT_INITIATED_ANNOTATION), None);
        assert!(!node.unschedulable);
        // The state label still reflects the host.
        assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("true"));
    }

    #[tokio::test]
    async fn running_enter_maintenance_task_counts_as_maintenance() {
        let fx = fixture();
        fx.cluster.insert_node(node_on("n1", "h0", false)).await;
        fx.sim
            .set_running_task("h0", "EnterMaintenanceMode")
            .await;

        fx.coordinator.run_cycle().await.unwrap();
        let node = get(&fx.cluster, "n1").await;
        assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("true"));
    }

    #[tokio::test]
    async fn alarm_state_force_drains() {
        let fx = fixture();
        fx.cluster.insert_node(node_on("n1", "h0", true)).await;
        fx.cluster.insert_pod(pod_on("stubborn", "n1")).await;
        // Eviction is blocked; only the alarm-driven force delete removes it.
        fx.cluster.block_eviction("default", "stubborn").await;
        fx.sim.set_alarm("h0", "Host hardware fault").await;

        fx.coordinator.run_cycle().await.unwrap();

        let node = get(&fx.cluster, "n1").await;
        assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("alarm"));
        assert!(fx.cluster.get_pod("default", "stubborn").await.unwrap().is_none());
        assert_eq!(fx.sim.power_state_of("n1").await, Some(VmPowerState::PoweredOff));
    }

    #[tokio::test]
    async fn unknown_state_leaves_labels_untouched() {
        let fx = fixture();
        let mut node = node_on("n1", "h0", true);
        node.labels
            .insert(ESX_IN_MAINTENANCE_LABEL.into(), "true".into());
        fx.cluster.insert_node(node).await;
        fx.sim.fail_runtime("h0").await;

        fx.coordinator.run_cycle().await.unwrap();

        let node = get(&fx.cluster, "n1").await;
        assert_eq!(node.label(ESX_IN_MAINTENANCE_LABEL), Some("true"));
        // No shutdown was initiated either.
        assert_eq!(node.annotation(ESX_REBOOT_INITIATED_ANNOTATION), None);
    }
}
