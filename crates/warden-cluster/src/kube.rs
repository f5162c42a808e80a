//! [`ClusterClient`] implementation backed by a real API server.
//!
//! Thin conversion layer only; every decision lives behind the trait so the
//! engine and its tests never see these types.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{ReplicaSet, StatefulSet};
use k8s_openapi::api::coordination::v1::{Lease as K8sLease, LeaseSpec};
use k8s_openapi::api::core::v1::{
    Event as K8sEvent, Node as K8sNode, ObjectReference, Pod as K8sPod, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use warden_domain::{Lease, Node, NodeCondition, NodeName, OwnerRef, Pod};

use crate::client::{ClusterClient, EvictionStyle, NodePatch};
use crate::error::ClusterError;

pub struct KubeCluster {
    client: Client,
    /// Namespace events for cluster-scoped node objects land in.
    event_namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        KubeCluster {
            client,
            event_namespace: "default".to_string(),
        }
    }

    fn nodes(&self) -> Api<K8sNode> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<K8sPod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn leases(&self, namespace: &str) -> Api<K8sLease> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn owner_of(&self, pod: &K8sPod) -> Option<OwnerRef> {
        let namespace = pod.metadata.namespace.as_deref()?;
        let reference = pod
            .metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|r| r.controller.unwrap_or(false))?;

        match reference.kind.as_str() {
            // A ReplicaSet is an implementation detail; report its Deployment.
            "ReplicaSet" => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
                match api.get_opt(&reference.name).await {
                    Ok(Some(rs)) => {
                        let replicas = rs.spec.as_ref().and_then(|s| s.replicas);
                        let deployment = rs
                            .metadata
                            .owner_references
                            .as_ref()
                            .and_then(|refs| {
                                refs.iter().find(|r| r.controller.unwrap_or(false))
                            });
                        match deployment {
                            Some(d) => Some(OwnerRef {
                                kind: d.kind.clone(),
                                name: d.name.clone(),
                                replicas,
                            }),
                            None => Some(OwnerRef {
                                kind: reference.kind.clone(),
                                name: reference.name.clone(),
                                replicas,
                            }),
                        }
                    }
                    _ => Some(OwnerRef {
                        kind: reference.kind.clone(),
                        name: reference.name.clone(),
                        replicas: None,
                    }),
                }
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let replicas = match api.get_opt(&reference.name).await {
                    Ok(Some(sts)) => sts.spec.as_ref().and_then(|s| s.replicas),
                    _ => None,
                };
                Some(OwnerRef {
                    kind: reference.kind.clone(),
                    name: reference.name.clone(),
                    replicas,
                })
            }
            _ => Some(OwnerRef {
                kind: reference.kind.clone(),
                name: reference.name.clone(),
                replicas: None,
            }),
        }
    }

    async fn convert_pod(&self, pod: K8sPod) -> Pod {
        let owner = self.owner_of(&pod).await;
        Pod {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            uid: pod.metadata.uid.clone().unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .map(NodeName::new),
            ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
            deletion_timestamp: pod.metadata.deletion_timestamp.as_ref().map(|t| t.0),
            owner,
        }
    }
}

fn convert_node(node: K8sNode) -> Node {
    let kubelet_version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.kubelet_version.clone())
        .unwrap_or_default();
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|c| NodeCondition {
            condition_type: c.type_,
            status: c.status,
        })
        .collect();
    Node {
        name: NodeName::new(node.metadata.name.unwrap_or_default()),
        labels: node.metadata.labels.unwrap_or_default(),
        annotations: node.metadata.annotations.unwrap_or_default(),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        kubelet_version,
        conditions,
    }
}

fn convert_lease(namespace: &str, lease: K8sLease) -> Lease {
    Lease {
        namespace: namespace.to_string(),
        name: lease.metadata.name.unwrap_or_default(),
        holder: lease
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.clone()),
        renew_time: lease
            .spec
            .as_ref()
            .and_then(|s| s.renew_time.as_ref())
            .map(|t| t.0),
        resource_version: lease.metadata.resource_version.unwrap_or_default(),
    }
}

fn to_k8s_lease(lease: &Lease) -> K8sLease {
    K8sLease {
        metadata: ObjectMeta {
            name: Some(lease.name.clone()),
            namespace: Some(lease.namespace.clone()),
            resource_version: if lease.resource_version.is_empty() {
                None
            } else {
                Some(lease.resource_version.clone())
            },
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: lease.holder.clone(),
            renew_time: lease.renew_time.map(MicroTime),
            ..Default::default()
        }),
    }
}

fn map_err(resource: &str, err: kube::Error) -> ClusterError {
    match &err {
        kube::Error::Api(response) if response.code == 409 => {
            ClusterError::Conflict(resource.to_string())
        }
        _ => ClusterError::Api(format!("{}: {}", resource, err)),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_node(&self, name: &NodeName) -> Result<Option<Node>, ClusterError> {
        let node = self
            .nodes()
            .get_opt(name.as_str())
            .await
            .map_err(|e| map_err(name.as_str(), e))?;
        Ok(node.map(convert_node))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let list = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(|e| map_err("nodes", e))?;
        Ok(list.items.into_iter().map(convert_node).collect())
    }

    async fn patch_node(&self, name: &NodeName, patch: &NodePatch) -> Result<(), ClusterError> {
        let labels: serde_json::Map<String, serde_json::Value> = patch
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().map(Into::into).unwrap_or(json!(null))))
            .collect();
        let annotations: serde_json::Map<String, serde_json::Value> = patch
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().map(Into::into).unwrap_or(json!(null))))
            .collect();

        let mut body = json!({
            "metadata": {
                "labels": labels,
                "annotations": annotations,
            }
        });
        if let Some(unschedulable) = patch.unschedulable {
            body["spec"] = json!({ "unschedulable": unschedulable });
        }

        self.nodes()
            .patch(name.as_str(), &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| map_err(name.as_str(), e))?;
        Ok(())
    }

    async fn delete_node(&self, name: &NodeName) -> Result<(), ClusterError> {
        self.nodes()
            .delete(name.as_str(), &DeleteParams::default())
            .await
            .map_err(|e| map_err(name.as_str(), e))?;
        Ok(())
    }

    async fn list_pods_on_node(&self, node: &NodeName) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<K8sPod> = Api::all(self.client.clone());
        let params =
            ListParams::default().fields(&format!("spec.nodeName={}", node.as_str()));
        let list = api
            .list(&params)
            .await
            .map_err(|e| map_err("pods", e))?;
        let mut pods = Vec::with_capacity(list.items.len());
        for item in list.items {
            pods.push(self.convert_pod(item).await);
        }
        Ok(pods)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        let pod = self
            .pods(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err(name, e))?;
        match pod {
            Some(pod) => Ok(Some(self.convert_pod(pod).await)),
            None => Ok(None),
        }
    }

    async fn evict_pod(
        &self,
        pod: &Pod,
        grace_period: Option<i64>,
        style: EvictionStyle,
    ) -> Result<(), ClusterError> {
        let api_version = match style {
            EvictionStyle::PolicyV1 => "policy/v1",
            EvictionStyle::PolicyV1beta1 => "policy/v1beta1",
        };
        let mut delete_options = json!({});
        if let Some(grace) = grace_period {
            delete_options = json!({ "gracePeriodSeconds": grace });
        }
        let body = json!({
            "apiVersion": api_version,
            "kind": "Eviction",
            "metadata": { "name": pod.name, "namespace": pod.namespace },
            "deleteOptions": delete_options,
        });

        let path = format!(
            "/api/v1/namespaces/{}/pods/{}/eviction",
            pod.namespace, pod.name
        );
        let request = http::Request::post(path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        match self
            .client
            .request::<serde_json::Value>(request)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 429 => Err(
                ClusterError::TooManyRequests(pod.namespace.clone(), pod.name.clone()),
            ),
            Err(e) => Err(map_err(&pod.name, e)),
        }
    }

    async fn delete_pod(&self, pod: &Pod, grace_period: Option<i64>) -> Result<(), ClusterError> {
        let params = DeleteParams {
            grace_period_seconds: grace_period.map(|g| g as u32),
            ..Default::default()
        };
        self.pods(&pod.namespace)
            .delete(&pod.name, &params)
            .await
            .map_err(|e| map_err(&pod.name, e))?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| map_err("version", e))?;
        Ok(info.git_version.trim_start_matches('v').to_string())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(k, v)| String::from_utf8(v.0).ok().map(|v| (k, v)))
                .collect()
        }))
    }

    async fn get_lease(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Lease>, ClusterError> {
        let lease = self
            .leases(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(lease.map(|l| convert_lease(namespace, l)))
    }

    async fn create_lease(&self, lease: &Lease) -> Result<Lease, ClusterError> {
        let created = self
            .leases(&lease.namespace)
            .create(&PostParams::default(), &to_k8s_lease(lease))
            .await
            .map_err(|e| map_err(&lease.name, e))?;
        Ok(convert_lease(&lease.namespace, created))
    }

    async fn update_lease(&self, lease: &Lease) -> Result<Lease, ClusterError> {
        let replaced = self
            .leases(&lease.namespace)
            .replace(&lease.name, &PostParams::default(), &to_k8s_lease(lease))
            .await
            .map_err(|e| map_err(&lease.name, e))?;
        Ok(convert_lease(&lease.namespace, replaced))
    }

    async fn emit_event(
        &self,
        node: &NodeName,
        reason: &str,
        message: &str,
    ) -> Result<(), ClusterError> {
        let now = chrono::Utc::now();
        let event = K8sEvent {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-maintenance-", node.as_str())),
                namespace: Some(self.event_namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Node".to_string()),
                name: Some(node.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some("Normal".to_string()),
            first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now)),
            last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(now)),
            count: Some(1),
            ..Default::default()
        };

        let api: Api<K8sEvent> = Api::namespaced(self.client.clone(), &self.event_namespace);
        api.create(&PostParams::default(), &event)
            .await
            .map_err(|e| map_err(node.as_str(), e))?;
        Ok(())
    }
}
