//! OpenNebula network facade
//!
//! Virtual networks map onto OCCI network resources. oned has no lifecycle
//! for a vnet, so presence means `active` and the up/down action pair is
//! declared unsupported instead of being faked.

use super::client::OneClient;
use super::document::{self, VnetDocument, VnetPool};
use crate::backend::pool::PoolCache;
use crate::backend::{require_id, require_kind, Capabilities, NetworkBackend, ResourceBackend};
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, NetworkState, Resource};
use crate::template::{TemplateContext, TemplateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const POOL_MINE: i64 = -3;
const POOL_RANGE_ALL: i64 = -1;
// one.vn.allocate: no cluster placement
const CLUSTER_NONE: i64 = -1;

pub struct OneNetwork {
    client: Arc<OneClient>,
    templates: Arc<TemplateStore>,
    vnets: PoolCache<VnetPool>,
}

impl OneNetwork {
    pub fn new(client: Arc<OneClient>, templates: Arc<TemplateStore>) -> Self {
        Self {
            client,
            templates,
            vnets: PoolCache::new(),
        }
    }

    fn vnet_id(id: &str) -> Result<i64> {
        require_id("id", id)?;
        id.parse()
            .map_err(|_| Error::IdentifierNotValid(id.to_string()))
    }

    async fn pool(&self) -> Result<Arc<VnetPool>> {
        self.vnets
            .pool("vnet", "mine", false, || async {
                let xml = self
                    .client
                    .call(
                        "one.vnpool.info",
                        &[POOL_MINE.into(), POOL_RANGE_ALL.into(), POOL_RANGE_ALL.into()],
                        Error::ResourceRetrieval,
                    )
                    .await?;
                document::parse_document(&xml, "vnet pool")
            })
            .await
    }

    fn to_resource(vnet: &VnetDocument) -> Resource {
        let mut resource = Resource::network(vnet.id.to_string()).with_title(vnet.name.clone());
        // A vnet exists or it does not; there is no down state to report
        resource.set_network_state(NetworkState::Active);
        resource.set_attribute("occi.network.allocation", "dynamic");
        if let Some(address) = &vnet.template.network_address {
            resource.set_attribute("occi.network.address", address.clone());
        }
        if let Some(gateway) = &vnet.template.gateway {
            resource.set_attribute("occi.network.gateway", gateway.clone());
        }
        if let Some(vlan) = &vnet.template.vlan_id {
            resource.set_attribute("occi.network.vlan", vlan.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceBackend for OneNetwork {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            actions: false,
            links: false,
            ..Capabilities::full("opennebula")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        Ok(pool
            .vnets
            .iter()
            .map(Self::to_resource)
            .filter(|r| filter.iter().all(|m| r.mixins.contains(m)))
            .collect())
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        Ok(self.list(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let xml = self
            .client
            .call(
                "one.vn.info",
                &[Self::vnet_id(id)?.into()],
                Error::ResourceRetrieval,
            )
            .await?;
        let vnet: VnetDocument = document::parse_document(&xml, "vnet")?;
        Ok(Self::to_resource(&vnet))
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "network")?;

        let mut ctx = TemplateContext::new();
        let name = resource
            .title
            .clone()
            .unwrap_or_else(|| format!("occi-{}", resource.id));
        ctx.insert("name".into(), name);
        for (attr, key) in [
            ("occi.network.address", "address"),
            ("occi.network.gateway", "gateway"),
            ("occi.network.vlan", "vlan"),
        ] {
            if let Some(value) = resource.attributes.get_str(attr) {
                ctx.insert(key.into(), value.to_string());
            }
        }
        let template = self.templates.render("network.tpl", &ctx)?;

        let id = self
            .client
            .call(
                "one.vn.allocate",
                &[template.into(), CLUSTER_NONE.into()],
                Error::ResourceCreation,
            )
            .await?;
        self.vnets.flush();

        info!(id = %id, "vnet allocated");
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
        let vid = Self::vnet_id(id)?;
        self.client
            .call("one.vn.delete", &[vid.into()], |reason| {
                Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                }
            })
            .await?;
        self.vnets.flush();
        debug!(id, "vnet deleted");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn trigger_action(&self, _id: &str, _action: &ActionInstance) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure("trigger_action", caps.actions)
    }
}

impl NetworkBackend for OneNetwork {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opennebula::client::RpcTransport;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcTransport for CannedTransport {
        async fn post(&self, body: String) -> Result<String> {
            self.requests.lock().push(body);
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn ok_response(body: &str) -> String {
        let escaped = body.replace('<', "&lt;").replace('>', "&gt;");
        format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param><value><array><data>\
             <value><boolean>1</boolean></value>\
             <value><string>{}</string></value>\
             <value><i4>0</i4></value>\
             </data></array></value></param></params></methodResponse>",
            escaped
        )
    }

    fn facade(responses: Vec<String>, dir: &std::path::Path) -> (Arc<CannedTransport>, OneNetwork) {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            requests: Mutex::new(vec![]),
        });
        let client = Arc::new(OneClient::new(transport.clone(), "alice:token"));
        (transport, OneNetwork::new(client, Arc::new(TemplateStore::new(dir))))
    }

    const VNET: &str = "<VNET><ID>5</ID><NAME>private</NAME><TEMPLATE>\
                        <NETWORK_ADDRESS>10.0.0.0</NETWORK_ADDRESS><GATEWAY>10.0.0.1</GATEWAY>\
                        </TEMPLATE></VNET>";

    #[tokio::test]
    async fn test_get_translates_vnet() {
        let dir = tempfile::tempdir().unwrap();
        let (_, network) = facade(vec![ok_response(VNET)], dir.path());

        let resource = network.get("5").await.unwrap();
        assert_eq!(resource.id, "5");
        assert_eq!(resource.title.as_deref(), Some("private"));
        assert_eq!(resource.attributes.get_str("occi.network.address"), Some("10.0.0.0"));
        // presence maps to active, but up/down are not dispatchable
        assert_eq!(resource.actions(), &["down"]);
    }

    #[tokio::test]
    async fn test_list_uses_pool_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pool = format!("<VNET_POOL>{}</VNET_POOL>", VNET);
        let (transport, network) = facade(vec![ok_response(&pool)], dir.path());

        assert_eq!(network.list(&[]).await.unwrap().len(), 1);
        assert_eq!(network.list(&[]).await.unwrap().len(), 1);
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_create_renders_template_and_allocates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("network.tpl"),
            "NAME = \"{{name}}\"\nNETWORK_ADDRESS = \"{{address}}\"\n",
        )
        .unwrap();
        let (transport, network) = facade(vec![ok_response("6")], dir.path());

        let mut resource = Resource::network("new").with_title("private");
        resource.set_attribute("occi.network.address", "10.0.0.0");
        let id = network.create(resource).await.unwrap();
        assert_eq!(id, "6");

        let sent = transport.requests.lock();
        assert!(sent[0].contains("<methodName>one.vn.allocate</methodName>"));
        assert!(sent[0].contains("NETWORK_ADDRESS = &quot;10.0.0.0&quot;")
            || sent[0].contains("NETWORK_ADDRESS = \"10.0.0.0\""));
    }

    #[tokio::test]
    async fn test_actions_are_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let (_, network) = facade(vec![], dir.path());
        assert_matches!(
            network.trigger_action("5", &ActionInstance::network("up")).await,
            Err(Error::MethodNotImplemented { .. })
        );
    }

    #[tokio::test]
    async fn test_missing_template_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, network) = facade(vec![], dir.path());
        assert_matches!(
            network.create(Resource::network("new")).await,
            Err(Error::Configuration(_))
        );
    }
}
