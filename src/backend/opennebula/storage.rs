//! OpenNebula storage facade
//!
//! Images map onto OCCI storage resources. online/offline dispatch to
//! enable/disable; the backup/snapshot/resize terms have no oned operation
//! on a standalone image and stay unimplemented.

use super::client::OneClient;
use super::document::{self, ImageDocument, ImagePool};
use crate::backend::pool::PoolCache;
use crate::backend::{require_id, require_kind, Capabilities, ResourceBackend, StorageBackend};
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Resource};
use crate::template::{TemplateContext, TemplateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const POOL_MINE: i64 = -3;
const POOL_RANGE_ALL: i64 = -1;
const DEFAULT_DATASTORE: i64 = 1;

pub struct OneStorage {
    client: Arc<OneClient>,
    templates: Arc<TemplateStore>,
    images: PoolCache<ImagePool>,
}

impl OneStorage {
    pub fn new(client: Arc<OneClient>, templates: Arc<TemplateStore>) -> Self {
        Self {
            client,
            templates,
            images: PoolCache::new(),
        }
    }

    fn image_id(id: &str) -> Result<i64> {
        require_id("id", id)?;
        id.parse()
            .map_err(|_| Error::IdentifierNotValid(id.to_string()))
    }

    async fn pool(&self) -> Result<Arc<ImagePool>> {
        self.images
            .pool("image", "mine", false, || async {
                let xml = self
                    .client
                    .call(
                        "one.imagepool.info",
                        &[POOL_MINE.into(), POOL_RANGE_ALL.into(), POOL_RANGE_ALL.into()],
                        Error::ResourceRetrieval,
                    )
                    .await?;
                document::parse_document(&xml, "image pool")
            })
            .await
    }

    async fn fetch(&self, id: i64) -> Result<ImageDocument> {
        let xml = self
            .client
            .call("one.image.info", &[id.into()], Error::ResourceRetrieval)
            .await?;
        document::parse_document(&xml, "image")
    }

    fn to_resource(image: &ImageDocument) -> Result<Resource> {
        let mut resource = Resource::storage(image.id.to_string()).with_title(image.name.clone());
        resource.set_storage_state(document::storage_state(image.state));
        if let Some(size_mb) = image.size_mb()? {
            // advertised in GiB
            resource.set_attribute("occi.storage.size", size_mb as f64 / 1024.0);
        }
        Ok(resource)
    }
}

#[async_trait]
impl ResourceBackend for OneStorage {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            links: false,
            ..Capabilities::full("opennebula")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        let mut resources = Vec::with_capacity(pool.images.len());
        for image in &pool.images {
            let resource = Self::to_resource(image)?;
            if filter.iter().all(|m| resource.mixins.contains(m)) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        Ok(self.list(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let image = self.fetch(Self::image_id(id)?).await?;
        Self::to_resource(&image)
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "storage")?;

        let mut ctx = TemplateContext::new();
        let name = resource
            .title
            .clone()
            .unwrap_or_else(|| format!("occi-{}", resource.id));
        ctx.insert("name".into(), name);
        if let Some(size_gb) = resource.attributes.get_float("occi.storage.size") {
            ctx.insert("size_mb".into(), ((size_gb * 1024.0) as i64).to_string());
        }
        let template = self.templates.render("storage.tpl", &ctx)?;

        let id = self
            .client
            .call(
                "one.image.allocate",
                &[template.into(), DEFAULT_DATASTORE.into()],
                Error::ResourceCreation,
            )
            .await?;
        self.images.flush();

        info!(id = %id, "image allocated");
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
        let iid = Self::image_id(id)?;
        self.client
            .call("one.image.delete", &[iid.into()], |reason| {
                Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                }
            })
            .await?;
        self.images.flush();
        debug!(id, "image deleted");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()> {
        let iid = Self::image_id(id)?;
        let term = action.term();
        let enable = match term {
            "online" => true,
            "offline" => false,
            _ => return Err(Error::ActionNotImplemented(action.action.identifier())),
        };

        let image = self.fetch(iid).await?;
        let state = document::storage_state(image.state);
        if !state.allows(term) {
            return Err(Error::ResourceState {
                state: state.to_string(),
                reason: format!("action {} not available", term),
            });
        }

        let action_term = term.to_string();
        self.client
            .call(
                "one.image.enable",
                &[iid.into(), enable.into()],
                |reason| Error::ResourceAction {
                    action: action_term,
                    reason,
                },
            )
            .await?;
        self.images.flush();
        Ok(())
    }
}

impl StorageBackend for OneStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::opennebula::client::RpcTransport;
    use crate::occi::StorageState;
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

    fn facade(responses: Vec<String>, dir: &std::path::Path) -> (Arc<CannedTransport>, OneStorage) {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            requests: Mutex::new(vec![]),
        });
        let client = Arc::new(OneClient::new(transport.clone(), "alice:token"));
        (transport, OneStorage::new(client, Arc::new(TemplateStore::new(dir))))
    }

    fn image_xml(state: i32) -> String {
        format!(
            "<IMAGE><ID>11</ID><NAME>data</NAME><STATE>{}</STATE><SIZE>10240</SIZE></IMAGE>",
            state
        )
    }

    #[tokio::test]
    async fn test_get_translates_image() {
        let dir = tempfile::tempdir().unwrap();
        let (_, storage) = facade(vec![ok_response(&image_xml(1))], dir.path());

        let resource = storage.get("11").await.unwrap();
        assert_eq!(resource.id, "11");
        assert_eq!(resource.attributes.get_float("occi.storage.size"), Some(10.0));
        assert_eq!(
            resource.state,
            Some(crate::occi::ResourceState::Storage(StorageState::Online))
        );
    }

    #[tokio::test]
    async fn test_online_in_ready_state_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, storage) = facade(vec![ok_response(&image_xml(1))], dir.path());
        assert_matches!(
            storage.trigger_action("11", &ActionInstance::storage("online")).await,
            Err(Error::ResourceState { .. })
        );
    }

    #[tokio::test]
    async fn test_offline_dispatches_disable() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, storage) =
            facade(vec![ok_response(&image_xml(1)), ok_response("11")], dir.path());

        storage
            .trigger_action("11", &ActionInstance::storage("offline"))
            .await
            .unwrap();
        let sent = transport.requests.lock();
        assert!(sent[1].contains("<methodName>one.image.enable</methodName>"));
        assert!(sent[1].contains("<boolean>0</boolean>"));
    }

    #[tokio::test]
    async fn test_resize_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let (_, storage) = facade(vec![], dir.path());
        assert_matches!(
            storage.trigger_action("11", &ActionInstance::storage("resize")).await,
            Err(Error::ActionNotImplemented(_))
        );
    }

    #[tokio::test]
    async fn test_create_allocates_with_rendered_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("storage.tpl"),
            "NAME = \"{{name}}\"\nSIZE = {{size_mb}}\nTYPE = DATABLOCK\n",
        )
        .unwrap();
        let (transport, storage) = facade(vec![ok_response("12")], dir.path());

        let mut resource = Resource::storage("new").with_title("scratch");
        resource.set_attribute("occi.storage.size", 2.0f64);
        let id = storage.create(resource).await.unwrap();
        assert_eq!(id, "12");

        let sent = transport.requests.lock();
        assert!(sent[0].contains("<methodName>one.image.allocate</methodName>"));
        assert!(sent[0].contains("SIZE = 2048"));
    }
}
