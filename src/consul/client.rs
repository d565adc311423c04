//! Consul catalog client over the HTTP API

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConsulConfig, RegistryClient};
use crate::model::DiscoveryRecord;
use crate::Error;

/// Header carrying the ACL token
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Body of `PUT /v1/catalog/register`
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogRegistration<'a> {
    node: &'a str,
    address: &'a str,
    service: AgentService<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    service: &'a str,
    tags: &'a [String],
    port: u16,
    address: &'a str,
}

/// Body of `PUT /v1/catalog/deregister`
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogDeregistration<'a> {
    node: &'a str,
    address: &'a str,
    #[serde(rename = "ServiceID")]
    service_id: &'a str,
}

/// One row of `GET /v1/catalog/service/:name`
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogService {
    node: String,
    address: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    service_port: u16,
}

impl From<CatalogService> for DiscoveryRecord {
    fn from(row: CatalogService) -> Self {
        Self {
            id: row.service_id,
            name: row.service_name,
            node: row.node,
            address: row.address,
            port: row.service_port,
            tags: row.service_tags.unwrap_or_default(),
        }
    }
}

/// [`RegistryClient`] backed by Consul's catalog endpoints
#[derive(Clone, Debug)]
pub struct ConsulCatalog {
    http: reqwest::Client,
    base_url: String,
    config: ConsulConfig,
}

impl ConsulCatalog {
    /// Build a client from configuration
    ///
    /// Fails when TLS material cannot be read or parsed.
    pub fn new(config: ConsulConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        if config.enable_ssl {
            if let Some(ref ca) = config.ca_cert_file {
                let pem = read_pem(ca)?;
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
            }

            match (&config.cert_file, &config.key_file) {
                (Some(cert), Some(key)) => {
                    let mut pem = read_pem(cert)?;
                    pem.extend(read_pem(key)?);
                    builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
                }
                (None, None) => {}
                _ => {
                    return Err(Error::config(
                        "consul-cert and consul-key must be given together",
                    ))
                }
            }

            if !config.ssl_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url(),
            config,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1{}", self.base_url, path);
        let mut request = self.http.request(method, url);

        if let Some(ref token) = self.config.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(ref auth) = self.config.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        request
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, Error> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::registry(format!(
            "{} returned {}: {}",
            what,
            status,
            body.trim()
        )))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))
}

#[async_trait]
impl RegistryClient for ConsulCatalog {
    async fn register(&self, record: &DiscoveryRecord) -> Result<(), Error> {
        let body = CatalogRegistration {
            node: &record.node,
            address: &record.address,
            service: AgentService {
                id: &record.id,
                service: &record.name,
                tags: &record.tags,
                port: record.port,
                address: &record.address,
            },
        };

        debug!(service = %record.name, id = %record.id, "PUT /v1/catalog/register");
        let request = self
            .request(Method::PUT, "/catalog/register")
            .json(&body);
        self.send(request, "catalog register").await?;
        Ok(())
    }

    async fn deregister(&self, record: &DiscoveryRecord) -> Result<(), Error> {
        let body = CatalogDeregistration {
            node: &record.node,
            address: &record.address,
            service_id: &record.id,
        };

        debug!(service = %record.name, id = %record.id, "PUT /v1/catalog/deregister");
        let request = self
            .request(Method::PUT, "/catalog/deregister")
            .json(&body);
        self.send(request, "catalog deregister").await?;
        Ok(())
    }

    async fn query(&self, name: &str, tag: &str) -> Result<Vec<DiscoveryRecord>, Error> {
        let mut request = self.request(Method::GET, &format!("/catalog/service/{name}"));
        if !tag.is_empty() {
            request = request.query(&[("tag", tag)]);
        }

        let response = self.send(request, "catalog service query").await?;
        let rows: Vec<CatalogService> = response
            .json()
            .await
            .map_err(|e| Error::serialization(format!("catalog service {name}: {e}")))?;

        Ok(rows.into_iter().map(DiscoveryRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::BasicAuth;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_for(server: &MockServer) -> ConsulCatalog {
        ConsulCatalog::new(ConsulConfig {
            address: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    fn dns_record() -> DiscoveryRecord {
        DiscoveryRecord::new(
            "web.default",
            "web-1",
            "10.0.0.5",
            53,
            vec!["udp".to_string(), "dns".to_string()],
        )
    }

    #[tokio::test]
    async fn register_sends_catalog_registration() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/catalog/register"))
            .and(body_json(json!({
                "Node": "web-1",
                "Address": "10.0.0.5",
                "Service": {
                    "ID": "web-1:10.0.0.5",
                    "Service": "web.default",
                    "Tags": ["udp", "dns"],
                    "Port": 53,
                    "Address": "10.0.0.5"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&server)
            .await;

        catalog_for(&server).register(&dns_record()).await.unwrap();
    }

    #[tokio::test]
    async fn deregister_sends_node_address_and_service_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/catalog/deregister"))
            .and(body_json(json!({
                "Node": "web-1",
                "Address": "10.0.0.5",
                "ServiceID": "web-1:10.0.0.5"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&server)
            .await;

        catalog_for(&server).deregister(&dns_record()).await.unwrap();
    }

    #[tokio::test]
    async fn query_maps_catalog_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/web.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "ID": "40e4a748-2192-161a-0510-9bf59fe950b5",
                    "Node": "web-1",
                    "Address": "10.0.0.5",
                    "Datacenter": "dc1",
                    "ServiceID": "web-1:10.0.0.5",
                    "ServiceName": "web.default",
                    "ServiceTags": ["udp", "dns"],
                    "ServiceAddress": "10.0.0.5",
                    "ServicePort": 53
                },
                {
                    "Node": "web-2",
                    "Address": "10.0.0.6",
                    "ServiceID": "web-2:10.0.0.6",
                    "ServiceName": "web.default",
                    "ServiceTags": null,
                    "ServicePort": 80
                }
            ])))
            .mount(&server)
            .await;

        let records = catalog_for(&server).query("web.default", "").await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], dns_record());
        assert_eq!(records[1].id, "web-2:10.0.0.6");
        assert!(records[1].tags.is_empty());
    }

    #[tokio::test]
    async fn query_passes_tag_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/web.default"))
            .and(query_param("tag", "udp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let records = catalog_for(&server).query("web.default", "udp").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn token_and_basic_auth_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("X-Consul-Token", "acl-token"))
            .and(header("Authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = ConsulCatalog::new(ConsulConfig {
            address: server.uri(),
            token: Some("acl-token".to_string()),
            auth: Some(BasicAuth {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();

        catalog.query("web.default", "").await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_a_registry_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/catalog/register"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ACL not found"))
            .mount(&server)
            .await;

        let err = catalog_for(&server)
            .register(&dns_record())
            .await
            .unwrap_err();

        match err {
            Error::Registry(msg) => {
                assert!(msg.contains("403"));
                assert!(msg.contains("ACL not found"));
            }
            other => panic!("Expected Registry error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_query_body_is_a_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = catalog_for(&server)
            .query("web.default", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn half_configured_client_identity_is_rejected() {
        let err = ConsulCatalog::new(ConsulConfig {
            enable_ssl: true,
            cert_file: Some("/etc/consul/client.pem".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_ca_file_is_a_config_error() {
        let err = ConsulCatalog::new(ConsulConfig {
            enable_ssl: true,
            ca_cert_file: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
