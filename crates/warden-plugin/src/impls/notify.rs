use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::PluginError;
use crate::impls::parse_config;
use crate::plugin::{NotifyPlugin, PluginParams};

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    message: String,
}

/// Posts a JSON payload describing the node's situation to an HTTP endpoint.
/// Chat systems and ticketing bridges consume this directly.
pub struct WebhookNotify {
    url: String,
    message: String,
    http: reqwest::Client,
}

impl WebhookNotify {
    pub fn from_config(config: &serde_yaml::Value) -> Result<Self, PluginError> {
        let cfg: WebhookConfig = parse_config("webhook", config)?;
        Ok(WebhookNotify {
            url: cfg.url,
            message: cfg.message,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl NotifyPlugin for WebhookNotify {
    fn id(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, params: &PluginParams) -> Result<(), PluginError> {
        let message = self
            .message
            .replace("{{node}}", params.node.name.as_str())
            .replace("{{profile}}", params.profile.as_str())
            .replace("{{state}}", &params.state.to_string());
        let payload = json!({
            "node": params.node.name.as_str(),
            "profile": params.profile.as_str(),
            "state": params.state.to_string(),
            "message": message,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PluginError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PluginError::Http(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use warden_cluster::InMemoryCluster;
    use warden_domain::{MaintenanceState, Node, ProfileName};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> PluginParams {
        PluginParams {
            node: Node::new("n1"),
            profile: ProfileName::new("flatcar"),
            state: MaintenanceState::MaintenanceRequired,
            client: Arc::new(InMemoryCluster::new()),
            now: Utc::now(),
            log_details: false,
        }
    }

    #[tokio::test]
    async fn posts_rendered_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "node": "n1",
                "profile": "flatcar",
                "message": "n1 needs approval",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = serde_yaml::from_str(&format!(
            "url: {}/hook\nmessage: \"{{{{node}}}} needs approval\"",
            server.uri()
        ))
        .unwrap();
        let notify = WebhookNotify::from_config(&config).unwrap();
        notify.notify(&params()).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config =
            serde_yaml::from_str(&format!("url: {}/hook", server.uri())).unwrap();
        let notify = WebhookNotify::from_config(&config).unwrap();
        let err = notify.notify(&params()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
