use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;
use warden_config::VCentersConfig;

use crate::error::EsxError;

/// Host runtime as reported by the HV.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime {
    pub in_maintenance_mode: bool,
    /// Names of tasks currently running against the host. A running
    /// EnterMaintenance task counts as maintenance; completed ones do not.
    pub running_tasks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// The HV operations the coordinator needs. Production talks to vCenter;
/// tests use [`SimHostApi`](crate::sim::SimHostApi).
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn host_runtime(&self, host: &str) -> Result<HostRuntime, EsxError>;

    /// Names of currently active alarms on the host.
    async fn host_alarms(&self, host: &str) -> Result<Vec<String>, EsxError>;

    async fn host_version(&self, host: &str) -> Result<String, EsxError>;

    async fn vm_power_state(&self, vm: &str) -> Result<VmPowerState, EsxError>;

    async fn power_on(&self, vm: &str) -> Result<(), EsxError>;

    async fn power_off(&self, vm: &str) -> Result<(), EsxError>;

    async fn logout(&self) -> Result<(), EsxError>;
}

/// Resolves the [`HostApi`] for an availability zone. Sessions live for one
/// coordinator cycle; `end_cycle` logs everything out so sessions never
/// accumulate on the vCenters.
#[async_trait]
pub trait HostApiPool: Send + Sync {
    async fn for_zone(&self, zone: &str) -> Result<Arc<dyn HostApi>, EsxError>;

    async fn end_cycle(&self);
}

// ── vCenter REST client ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ValueEnvelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct RuntimeBody {
    #[serde(default)]
    in_maintenance_mode: bool,
    #[serde(default)]
    recent_tasks: Vec<TaskBody>,
}

#[derive(Debug, Deserialize)]
struct TaskBody {
    name: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct AlarmBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PowerBody {
    state: String,
}

/// REST client for one vCenter. Authenticates lazily; the session token is
/// cached until [`logout`](HostApi::logout).
pub struct VCenterClient {
    base: String,
    username: String,
    password: String,
    http: reqwest::Client,
    session: Mutex<Option<String>>,
}

impl VCenterClient {
    pub fn new(
        base: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
    ) -> Result<Self, EsxError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| EsxError::Http(e.to_string()))?;
        Ok(VCenterClient {
            base: base.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            http,
            session: Mutex::new(None),
        })
    }

    async fn session_token(&self) -> Result<String, EsxError> {
        let mut guard = self.session.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let response = self
            .http
            .post(format!("{}/rest/com/vmware/cis/session", self.base))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| EsxError::Session(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EsxError::Session(format!(
                "login returned {}",
                response.status()
            )));
        }
        let body: ValueEnvelope<String> = response
            .json()
            .await
            .map_err(|e| EsxError::Session(e.to_string()))?;
        *guard = Some(body.value.clone());
        Ok(body.value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        object: &str,
        path: &str,
    ) -> Result<T, EsxError> {
        let token = self.session_token().await?;
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .header("vmware-api-session-id", token)
            .send()
            .await
            .map_err(|e| EsxError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EsxError::Api {
                object: object.to_string(),
                message: format!("GET {} returned {}", path, response.status()),
            });
        }
        response.json().await.map_err(|e| EsxError::Api {
            object: object.to_string(),
            message: e.to_string(),
        })
    }

    async fn post(&self, object: &str, path: &str) -> Result<(), EsxError> {
        let token = self.session_token().await?;
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("vmware-api-session-id", token)
            .send()
            .await
            .map_err(|e| EsxError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EsxError::Api {
                object: object.to_string(),
                message: format!("POST {} returned {}", path, response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HostApi for VCenterClient {
    async fn host_runtime(&self, host: &str) -> Result<HostRuntime, EsxError> {
        let body: ValueEnvelope<RuntimeBody> = self
            .get_json(host, &format!("/rest/vcenter/host/{}/runtime", host))
            .await?;
        Ok(HostRuntime {
            in_maintenance_mode: body.value.in_maintenance_mode,
            running_tasks: body
                .value
                .recent_tasks
                .into_iter()
                .filter(|t| t.state.eq_ignore_ascii_case("running"))
                .map(|t| t.name)
                .collect(),
        })
    }

    async fn host_alarms(&self, host: &str) -> Result<Vec<String>, EsxError> {
        let body: ValueEnvelope<Vec<AlarmBody>> = self
            .get_json(host, &format!("/rest/vcenter/host/{}/alarms", host))
            .await?;
        Ok(body.value.into_iter().map(|a| a.name).collect())
    }

    async fn host_version(&self, host: &str) -> Result<String, EsxError> {
        let body: ValueEnvelope<String> = self
            .get_json(host, &format!("/rest/vcenter/host/{}/version", host))
            .await?;
        Ok(body.value)
    }

    async fn vm_power_state(&self, vm: &str) -> Result<VmPowerState, EsxError> {
        let body: ValueEnvelope<PowerBody> = self
            .get_json(vm, &format!("/rest/vcenter/vm/{}/power", vm))
            .await?;
        match body.value.state.as_str() {
            "POWERED_ON" => Ok(VmPowerState::PoweredOn),
            "POWERED_OFF" => Ok(VmPowerState::PoweredOff),
            "SUSPENDED" => Ok(VmPowerState::Suspended),
            other => Err(EsxError::Api {
                object: vm.to_string(),
                message: format!("unknown power state '{}'", other),
            }),
        }
    }

    async fn power_on(&self, vm: &str) -> Result<(), EsxError> {
        self.post(vm, &format!("/rest/vcenter/vm/{}/power/start", vm))
            .await
    }

    async fn power_off(&self, vm: &str) -> Result<(), EsxError> {
        self.post(vm, &format!("/rest/vcenter/vm/{}/power/stop", vm))
            .await
    }

    async fn logout(&self) -> Result<(), EsxError> {
        let mut guard = self.session.lock().await;
        let token = match guard.take() {
            Some(token) => token,
            None => return Ok(()),
        };
        let response = self
            .http
            .delete(format!("{}/rest/com/vmware/cis/session", self.base))
            .header("vmware-api-session-id", token)
            .send()
            .await
            .map_err(|e| EsxError::Session(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EsxError::Session(format!(
                "logout returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Per-cycle client cache keyed by availability zone. The vCenter URL comes
/// from the template with `$AZ` substituted.
pub struct VCenterPool {
    config: VCentersConfig,
    clients: Mutex<BTreeMap<String, Arc<VCenterClient>>>,
}

impl VCenterPool {
    pub fn new(config: VCentersConfig) -> Self {
        VCenterPool {
            config,
            clients: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl HostApiPool for VCenterPool {
    async fn for_zone(&self, zone: &str) -> Result<Arc<dyn HostApi>, EsxError> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(zone) {
            return Ok(client.clone());
        }
        let credential = self
            .config
            .credentials
            .get(zone)
            .ok_or_else(|| EsxError::NoCredentials(zone.to_string()))?;
        let client = Arc::new(VCenterClient::new(
            self.config.url_for_zone(zone),
            &credential.username,
            &credential.password,
            self.config.insecure,
        )?);
        guard.insert(zone.to_string(), client.clone());
        Ok(client)
    }

    async fn end_cycle(&self) {
        let clients: Vec<(String, Arc<VCenterClient>)> = {
            let mut guard = self.clients.lock().await;
            std::mem::take(&mut *guard).into_iter().collect()
        };
        for (zone, client) in clients {
            if let Err(e) = client.logout().await {
                warn!(availability_zone = %zone, error = %e, "vCenter logout failed");
            }
        }
    }
}
