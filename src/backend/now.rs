//! NOW backend
//!
//! A network-only family fronting the NOW REST service, which manages
//! per-user VLANs on top of a shared fabric. Only the network facade is
//! registered; resolving any other kind through this family's proxy is a
//! configuration error. All exchanges are JSON over HTTP with the effective
//! user passed as a query parameter.

use crate::backend::pool::PoolCache;
use crate::backend::{
    require_id, require_kind, BackendProxy, Capabilities, ModelExtender, ModelExtenderRef,
    NetworkBackend, OtherBackends, ResourceBackend,
};
use crate::config::NowConfig;
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Model, NetworkState, Resource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

// =============================================================================
// Wire documents
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkDocument {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    vlan: Option<i64>,
    #[serde(default)]
    range: Option<RangeDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RangeDocument {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    gateway: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// One REST exchange; mockable in tests
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<String>,
    ) -> Result<(u16, String)>;
}

/// reqwest-backed transport
pub struct JsonTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl JsonTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RestTransport for JsonTransport {
    async fn request(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<String>,
    ) -> Result<(u16, String)> {
        let url = format!("{}{}", self.endpoint, path_and_query);
        let mut request = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => return Err(Error::Internal(format!("unsupported method {}", other))),
        };
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok((status, body))
    }
}

/// The single choke point for NOW calls; HTTP statuses map into the taxonomy
/// here and nowhere else
struct NowClient {
    transport: Arc<dyn RestTransport>,
    user: String,
}

impl NowClient {
    fn path(&self, path: &str) -> String {
        format!("{}?user={}", path, urlencoding::encode(&self.user))
    }

    async fn call<F>(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        fallback: F,
    ) -> Result<String>
    where
        F: FnOnce(String) -> Error,
    {
        trace!(method, path, "now call");
        let (status, response) = self
            .transport
            .request(method, &self.path(path), body)
            .await?;
        match status {
            200..=299 => {
                debug!(method, path, "now ok");
                Ok(response)
            }
            401 => Err(Error::Authentication(response)),
            403 => Err(Error::Authorization(response)),
            404 => Err(Error::not_found("now", response)),
            400 | 422 => Err(Error::ResourceNotValid(response)),
            500..=599 => Err(Error::Connection(format!("HTTP {}: {}", status, response))),
            _ => Err(fallback(response)),
        }
    }
}

// =============================================================================
// Network facade
// =============================================================================

pub struct NowNetwork {
    client: NowClient,
    networks: PoolCache<Vec<NetworkDocument>>,
}

impl NowNetwork {
    fn network_id(id: &str) -> Result<i64> {
        require_id("id", id)?;
        id.parse()
            .map_err(|_| Error::IdentifierNotValid(id.to_string()))
    }

    async fn pool(&self) -> Result<Arc<Vec<NetworkDocument>>> {
        self.networks
            .pool("network", "user", false, || async {
                let body = self
                    .client
                    .call("GET", "/networks", None, Error::ResourceRetrieval)
                    .await?;
                serde_json::from_str(&body).map_err(|e| {
                    Error::ResourceRetrieval(format!("cannot parse network list: {}", e))
                })
            })
            .await
    }

    fn to_resource(network: &NetworkDocument) -> Resource {
        let id = network.id.to_string();
        let title = network.title.clone().unwrap_or_else(|| id.clone());
        let mut resource = Resource::network(id).with_title(title);
        resource.set_network_state(NetworkState::Active);
        resource.set_attribute("occi.network.allocation", "dynamic");
        if let Some(vlan) = network.vlan {
            resource.set_attribute("occi.network.vlan", vlan);
        }
        if let Some(range) = &network.range {
            if let Some(address) = &range.address {
                resource.set_attribute("occi.network.address", address.clone());
            }
            if let Some(gateway) = &range.gateway {
                resource.set_attribute("occi.network.gateway", gateway.clone());
            }
        }
        resource
    }

    fn to_document(resource: &Resource) -> NetworkDocument {
        NetworkDocument {
            id: 0,
            title: resource.title.clone(),
            vlan: resource.attributes.get_int("occi.network.vlan"),
            range: resource
                .attributes
                .get_str("occi.network.address")
                .map(|address| RangeDocument {
                    address: Some(address.to_string()),
                    gateway: resource
                        .attributes
                        .get_str("occi.network.gateway")
                        .map(String::from),
                }),
        }
    }
}

#[async_trait]
impl ResourceBackend for NowNetwork {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            actions: false,
            links: false,
            ..Capabilities::full("now")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        Ok(pool
            .iter()
            .map(Self::to_resource)
            .filter(|r| filter.iter().all(|m| r.mixins.contains(m)))
            .collect())
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        Ok(self.list(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let nid = Self::network_id(id)?;
        let body = self
            .client
            .call(
                "GET",
                &format!("/network/{}", nid),
                None,
                Error::ResourceRetrieval,
            )
            .await?;
        let network: NetworkDocument = serde_json::from_str(&body)
            .map_err(|e| Error::ResourceRetrieval(format!("cannot parse network: {}", e)))?;
        Ok(Self::to_resource(&network))
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "network")?;
        let document = Self::to_document(&resource);
        let body = serde_json::to_string(&document)
            .map_err(|e| Error::Internal(format!("cannot serialize network: {}", e)))?;

        let response = self
            .client
            .call("POST", "/network", Some(body), Error::ResourceCreation)
            .await?;
        let id: serde_json::Value = serde_json::from_str(&response)
            .map_err(|e| Error::ResourceCreation(format!("cannot parse created id: {}", e)))?;
        let id = match &id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Object(fields) => fields
                .get("id")
                .map(|v| v.to_string().trim_matches('"').to_string())
                .ok_or_else(|| Error::ResourceCreation("no id in response".into()))?,
            other => {
                return Err(Error::ResourceCreation(format!(
                    "unexpected creation response: {}",
                    other
                )))
            }
        };
        self.networks.flush();

        info!(id = %id, "network created");
        Ok(id)
    }

    async fn update(&self, _resource: Resource) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure("update", caps.update)
    }

    async fn partial_update(
        &self,
        _id: &str,
        _mixins: &[String],
        _attributes: &Attributes,
    ) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure("partial_update", caps.partial_update)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let nid = Self::network_id(id)?;
        self.client
            .call(
                "DELETE",
                &format!("/network/{}", nid),
                None,
                |reason| Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                },
            )
            .await?;
        self.networks.flush();
        debug!(id, "network deleted");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn trigger_action(&self, _id: &str, action: &ActionInstance) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure(&format!("action {}", action.term()), caps.actions)
    }
}

impl NetworkBackend for NowNetwork {}

// =============================================================================
// Family wiring
// =============================================================================

/// Build the NOW facade family and its model extender
pub fn build(config: &NowConfig) -> Result<(BackendProxy, ModelExtenderRef)> {
    if config.endpoint.is_empty() {
        return Err(Error::Configuration("now.endpoint must be set".into()));
    }

    let transport = Arc::new(JsonTransport::new(&config.endpoint, config.timeout())?);
    let network = Arc::new(NowNetwork {
        client: NowClient {
            transport,
            user: config.user.clone(),
        },
        networks: PoolCache::new(),
    });

    // No compute or storage facade, so no cross-facade wiring either
    let proxy = BackendProxy::new().with_network(network);

    info!(endpoint = %config.endpoint, user = %config.user, "now backend ready");
    Ok((proxy, Arc::new(NowExtender)))
}

/// NOW serves no template catalogues; the extender only materializes the
/// skeleton mixins so filtering by them stays well-defined
struct NowExtender;

#[async_trait]
impl ModelExtender for NowExtender {
    async fn extend_model(&self, model: &mut Model) -> Result<()> {
        for term in crate::occi::model::SKELETON_TERMS {
            model.skeleton(term)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occi::ResourceState;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<(u16, String)>>,
        requests: Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl RestTransport for CannedTransport {
        async fn request(
            &self,
            method: &str,
            path_and_query: &str,
            body: Option<String>,
        ) -> Result<(u16, String)> {
            self.requests
                .lock()
                .push((method.to_string(), path_and_query.to_string(), body));
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn facade(responses: Vec<(u16, &str)>) -> (Arc<CannedTransport>, NowNetwork) {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(
                responses.into_iter().rev().map(|(s, b)| (s, b.to_string())).collect(),
            ),
            requests: Mutex::new(vec![]),
        });
        let network = NowNetwork {
            client: NowClient {
                transport: transport.clone(),
                user: "alice".into(),
            },
            networks: PoolCache::new(),
        };
        (transport, network)
    }

    #[tokio::test]
    async fn test_list_translates_networks_and_scopes_to_user() {
        let (transport, network) = facade(vec![(
            200,
            r#"[{"id": 7, "title": "lab", "vlan": 42, "range": {"address": "10.0.7.0/24"}}]"#,
        )]);

        let resources = network.list(&[]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "7");
        assert_eq!(resources[0].title.as_deref(), Some("lab"));
        assert_eq!(
            resources[0].state,
            Some(ResourceState::Network(NetworkState::Active))
        );
        assert_eq!(
            resources[0].attributes.get_int("occi.network.vlan"),
            Some(42)
        );

        let sent = transport.requests.lock();
        assert_eq!(sent[0].0, "GET");
        assert_eq!(sent[0].1, "/networks?user=alice");
    }

    #[tokio::test]
    async fn test_get_missing_network_is_not_found() {
        let (_, network) = facade(vec![(404, "no such network")]);
        assert_matches!(network.get("9").await, Err(Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_rejects_non_numeric_id() {
        let (_, network) = facade(vec![]);
        assert_matches!(network.get("lab").await, Err(Error::IdentifierNotValid(_)));
    }

    #[tokio::test]
    async fn test_create_posts_document_and_returns_id() {
        let (transport, network) = facade(vec![(201, "8")]);

        let mut resource = Resource::network("new").with_title("lab2");
        resource.set_attribute("occi.network.vlan", 43i64);
        resource.set_attribute("occi.network.address", "10.0.8.0/24");
        let id = network.create(resource).await.unwrap();
        assert_eq!(id, "8");

        let sent = transport.requests.lock();
        assert_eq!(sent[0].0, "POST");
        assert_eq!(sent[0].1, "/network?user=alice");
        let body: serde_json::Value =
            serde_json::from_str(sent[0].2.as_deref().unwrap()).unwrap();
        assert_eq!(body["title"], "lab2");
        assert_eq!(body["vlan"], 43);
        assert_eq!(body["range"]["address"], "10.0.8.0/24");
    }

    #[tokio::test]
    async fn test_unauthenticated_is_authentication_error() {
        let (_, network) = facade(vec![(401, "who are you")]);
        assert_matches!(network.list(&[]).await, Err(Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_update_is_not_implemented() {
        let (_, network) = facade(vec![]);
        assert_matches!(
            network.update(Resource::network("7")).await,
            Err(Error::MethodNotImplemented { .. })
        );
    }

    #[tokio::test]
    async fn test_delete_flushes_cached_pool() {
        let (transport, network) = facade(vec![
            (200, r#"[{"id": 7}]"#),
            (200, "ok"),
            (200, "[]"),
        ]);

        assert_eq!(network.list(&[]).await.unwrap().len(), 1);
        network.delete("7").await.unwrap();
        assert_eq!(network.list(&[]).await.unwrap().len(), 0);
        assert_eq!(transport.requests.lock().len(), 3);
    }

    #[test]
    fn test_build_requires_endpoint() {
        let config = NowConfig {
            endpoint: String::new(),
            ..NowConfig::default()
        };
        assert_matches!(build(&config), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_build_serves_network_only() {
        let config = NowConfig::default();
        let (proxy, _) = build(&config).unwrap();
        assert!(proxy.network().is_ok());
        assert_matches!(proxy.compute(), Err(Error::Configuration(_)));
        assert_matches!(proxy.storage(), Err(Error::Configuration(_)));
    }
}
