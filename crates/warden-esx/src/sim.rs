//! In-memory HV double for tests and local runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::{HostApi, HostApiPool, HostRuntime, VmPowerState};
use crate::error::EsxError;

#[derive(Debug, Default)]
struct SimInner {
    maintenance: BTreeMap<String, bool>,
    tasks: BTreeMap<String, Vec<String>>,
    alarms: BTreeMap<String, Vec<String>>,
    versions: BTreeMap<String, String>,
    power: BTreeMap<String, VmPowerState>,
    runtime_errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SimHostApi {
    inner: Arc<Mutex<SimInner>>,
}

impl SimHostApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_maintenance(&self, host: &str, value: bool) {
        self.inner.lock().await.maintenance.insert(host.into(), value);
    }

    pub async fn set_running_task(&self, host: &str, task: &str) {
        self.inner
            .lock()
            .await
            .tasks
            .entry(host.into())
            .or_default()
            .push(task.into());
    }

    pub async fn set_alarm(&self, host: &str, alarm: &str) {
        self.inner
            .lock()
            .await
            .alarms
            .entry(host.into())
            .or_default()
            .push(alarm.into());
    }

    pub async fn clear_alarms(&self, host: &str) {
        self.inner.lock().await.alarms.remove(host);
    }

    pub async fn set_version(&self, host: &str, version: &str) {
        self.inner.lock().await.versions.insert(host.into(), version.into());
    }

    pub async fn set_power(&self, vm: &str, state: VmPowerState) {
        self.inner.lock().await.power.insert(vm.into(), state);
    }

    /// Make `host_runtime` fail for this host, driving the `unknown` path.
    pub async fn fail_runtime(&self, host: &str) {
        self.inner.lock().await.runtime_errors.push(host.into());
    }

    pub async fn power_state_of(&self, vm: &str) -> Option<VmPowerState> {
        self.inner.lock().await.power.get(vm).copied()
    }
}

#[async_trait]
impl HostApi for SimHostApi {
    async fn host_runtime(&self, host: &str) -> Result<HostRuntime, EsxError> {
        let guard = self.inner.lock().await;
        if guard.runtime_errors.iter().any(|h| h == host) {
            return Err(EsxError::Api {
                object: host.to_string(),
                message: "simulated outage".into(),
            });
        }
        Ok(HostRuntime {
            in_maintenance_mode: guard.maintenance.get(host).copied().unwrap_or(false),
            running_tasks: guard.tasks.get(host).cloned().unwrap_or_default(),
        })
    }

    async fn host_alarms(&self, host: &str) -> Result<Vec<String>, EsxError> {
        let guard = self.inner.lock().await;
        Ok(guard.alarms.get(host).cloned().unwrap_or_default())
    }

    async fn host_version(&self, host: &str) -> Result<String, EsxError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .versions
            .get(host)
            .cloned()
            .unwrap_or_else(|| "7.0.3-00000".to_string()))
    }

    async fn vm_power_state(&self, vm: &str) -> Result<VmPowerState, EsxError> {
        let guard = self.inner.lock().await;
        Ok(guard.power.get(vm).copied().unwrap_or(VmPowerState::PoweredOn))
    }

    async fn power_on(&self, vm: &str) -> Result<(), EsxError> {
        self.inner
            .lock()
            .await
            .power
            .insert(vm.into(), VmPowerState::PoweredOn);
        Ok(())
    }

    async fn power_off(&self, vm: &str) -> Result<(), EsxError> {
        self.inner
            .lock()
            .await
            .power
            .insert(vm.into(), VmPowerState::PoweredOff);
        Ok(())
    }

    async fn logout(&self) -> Result<(), EsxError> {
        Ok(())
    }
}

/// Pool returning the same simulated API for every zone.
#[derive(Clone, Default)]
pub struct SimPool {
    api: SimHostApi,
}

impl SimPool {
    pub fn new(api: SimHostApi) -> Self {
        SimPool { api }
    }
}

#[async_trait]
impl HostApiPool for SimPool {
    async fn for_zone(&self, _zone: &str) -> Result<Arc<dyn HostApi>, EsxError> {
        Ok(Arc::new(self.api.clone()))
    }

    async fn end_cycle(&self) {}
}
