use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use warden_config::OpenStackCredentials;

use crate::error::KubernikusError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
}

/// The OpenStack operations the coordinator needs: find the server backing a
/// node by name and delete it.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>, KubernikusError>;

    async fn delete_server(&self, id: &str) -> Result<(), KubernikusError>;
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    compute_url: String,
}

/// Keystone v3 password auth plus the two Nova calls. The token is cached
/// until a request comes back 401.
pub struct OpenStackClient {
    credentials: OpenStackCredentials,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
}

impl OpenStackClient {
    pub fn new(credentials: OpenStackCredentials) -> Self {
        OpenStackClient {
            credentials,
            http: reqwest::Client::new(),
            session: Mutex::new(None),
        }
    }

    async fn session(&self) -> Result<Session, KubernikusError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    async fn authenticate(&self) -> Result<Session, KubernikusError> {
        let creds = &self.credentials;
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": creds.username,
                            "domain": { "name": creds.domain_name },
                            "password": creds.password,
                        }
                    }
                },
                "scope": {
                    "project": { "id": creds.tenant_id }
                }
            }
        });

        let auth_url = creds.auth_url.trim_end_matches('/');
        let response = self
            .http
            .post(format!("{}/auth/tokens", auth_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| KubernikusError::Auth(e.to_string()))?;
        if !response.status().is_success() {
            return Err(KubernikusError::Auth(format!(
                "keystone returned {}",
                response.status()
            )));
        }
        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| KubernikusError::Auth("keystone returned no token".into()))?;

        #[derive(Deserialize)]
        struct TokenBody {
            token: Catalog,
        }
        #[derive(Deserialize)]
        struct Catalog {
            #[serde(default)]
            catalog: Vec<Service>,
        }
        #[derive(Deserialize)]
        struct Service {
            #[serde(rename = "type")]
            service_type: String,
            #[serde(default)]
            endpoints: Vec<Endpoint>,
        }
        #[derive(Deserialize)]
        struct Endpoint {
            interface: String,
            region: String,
            url: String,
        }

        let body: TokenBody = response
            .json()
            .await
            .map_err(|e| KubernikusError::Auth(e.to_string()))?;
        let compute_url = body
            .token
            .catalog
            .iter()
            .find(|s| s.service_type == "compute")
            .and_then(|s| {
                s.endpoints
                    .iter()
                    .find(|e| e.interface == "public" && e.region == creds.region)
            })
            .map(|e| e.url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                KubernikusError::Auth(format!(
                    "no public compute endpoint for region '{}'",
                    creds.region
                ))
            })?;

        Ok(Session { token, compute_url })
    }
}

#[async_trait]
impl CloudApi for OpenStackClient {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>, KubernikusError> {
        let session = self.session().await?;
        let response = self
            .http
            .get(format!("{}/servers", session.compute_url))
            .query(&[("name", name)])
            .header("x-auth-token", &session.token)
            .send()
            .await
            .map_err(|e| KubernikusError::Api(e.to_string()))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate().await;
            return Err(KubernikusError::Auth("token expired".into()));
        }
        if !response.status().is_success() {
            return Err(KubernikusError::Api(format!(
                "server listing returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct ServersBody {
            #[serde(default)]
            servers: Vec<Server>,
        }
        let body: ServersBody = response
            .json()
            .await
            .map_err(|e| KubernikusError::Api(e.to_string()))?;
        Ok(body.servers)
    }

    async fn delete_server(&self, id: &str) -> Result<(), KubernikusError> {
        let session = self.session().await?;
        let response = self
            .http
            .delete(format!("{}/servers/{}", session.compute_url, id))
            .header("x-auth-token", &session.token)
            .send()
            .await
            .map_err(|e| KubernikusError::Api(e.to_string()))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate().await;
            return Err(KubernikusError::Auth("token expired".into()));
        }
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND
        {
            return Err(KubernikusError::Api(format!(
                "server deletion returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(auth_url: String) -> OpenStackCredentials {
        OpenStackCredentials {
            auth_url,
            username: "maintenance".into(),
            password: "hunter2".into(),
            region: "qa-de-1".into(),
            domain_name: "svc".into(),
            tenant_id: "tenant".into(),
        }
    }

    async fn mock_keystone(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-subject-token", "tok-42")
                    .set_body_json(json!({
                        "token": {
                            "catalog": [{
                                "type": "compute",
                                "endpoints": [{
                                    "interface": "public",
                                    "region": "qa-de-1",
                                    "url": format!("{}/compute", server.uri()),
                                }]
                            }]
                        }
                    })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn lists_servers_by_name_with_token() {
        let server = MockServer::start().await;
        mock_keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/servers"))
            .and(query_param("name", "n1"))
            .and(header("x-auth-token", "tok-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [{"id": "srv-1", "name": "n1"}]
            })))
            .mount(&server)
            .await;

        let client = OpenStackClient::new(credentials(server.uri()));
        let servers = client.list_servers("n1").await.unwrap();
        assert_eq!(
            servers,
            vec![Server {
                id: "srv-1".into(),
                name: "n1".into()
            }]
        );
    }

    #[tokio::test]
    async fn deletes_server_by_id() {
        let server = MockServer::start().await;
        mock_keystone(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/compute/servers/srv-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenStackClient::new(credentials(server.uri()));
        client.delete_server("srv-1").await.unwrap();
    }

    #[tokio::test]
    async fn missing_compute_endpoint_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-subject-token", "tok-42")
                    .set_body_json(json!({"token": {"catalog": []}})),
            )
            .mount(&server)
            .await;

        let client = OpenStackClient::new(credentials(server.uri()));
        assert!(matches!(
            client.list_servers("n1").await,
            Err(KubernikusError::Auth(_))
        ));
    }
}
