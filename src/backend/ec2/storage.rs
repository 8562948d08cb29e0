//! EC2 storage facade
//!
//! EBS volumes map onto OCCI storage resources. Volumes are created in the
//! zone named by an attached availability_zone mixin, falling back to the
//! region's `a` zone. EBS has no standalone enable/disable, so the storage
//! action terms stay unimplemented.

use super::client::Ec2Client;
use super::document::{self, CreateVolumeResponse, DescribeVolumesResponse, VolumeItem};
use crate::backend::pool::PoolCache;
use crate::backend::{require_id, require_kind, Capabilities, ResourceBackend, StorageBackend};
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Resource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Ec2Storage {
    client: Arc<Ec2Client>,
    region: String,
    volumes: PoolCache<DescribeVolumesResponse>,
}

impl Ec2Storage {
    pub fn new(client: Arc<Ec2Client>, region: &str) -> Self {
        Self {
            client,
            region: region.to_string(),
            volumes: PoolCache::new(),
        }
    }

    async fn pool(&self) -> Result<Arc<DescribeVolumesResponse>> {
        self.volumes
            .pool("volume", "all", false, || async {
                let xml = self
                    .client
                    .call("DescribeVolumes", &[], Error::ResourceRetrieval)
                    .await?;
                document::parse_document(&xml, "DescribeVolumes")
            })
            .await
    }

    async fn fetch(&self, id: &str) -> Result<VolumeItem> {
        require_id("id", id)?;
        let xml = self
            .client
            .call(
                "DescribeVolumes",
                &[("VolumeId.1".to_string(), id.to_string())],
                Error::ResourceRetrieval,
            )
            .await?;
        let doc: DescribeVolumesResponse = document::parse_document(&xml, "DescribeVolumes")?;
        doc.volumes
            .items
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("storage", id))
    }

    fn to_resource(volume: &VolumeItem) -> Result<Resource> {
        let mut resource =
            Resource::storage(volume.volume_id.clone()).with_title(volume.volume_id.clone());
        resource.set_storage_state(document::storage_state(&volume.status));
        if let Some(size) = volume.size_gb()? {
            resource.set_attribute("occi.storage.size", size as f64);
        }
        Ok(resource)
    }

    /// Zone for a new volume: an attached availability_zone mixin wins,
    /// otherwise the region's first zone
    fn placement_zone(&self, resource: &Resource) -> Result<String> {
        match resource.mixin_instances_of("availability_zone").first() {
            Some(mixin) => {
                let zone = mixin
                    .rsplit('_')
                    .next()
                    .filter(|z| !z.is_empty())
                    .ok_or_else(|| {
                        Error::ResourceNotValid(format!("mixin {} does not name a zone", mixin))
                    })?;
                Ok(zone.to_string())
            }
            None => Ok(format!("{}a", self.region)),
        }
    }
}

#[async_trait]
impl ResourceBackend for Ec2Storage {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            actions: false,
            links: false,
            ..Capabilities::full("ec2")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        let mut resources = Vec::with_capacity(pool.volumes.items.len());
        for volume in &pool.volumes.items {
            let resource = Self::to_resource(volume)?;
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
        let volume = self.fetch(id).await?;
        Self::to_resource(&volume)
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "storage")?;
        let size_gb = resource
            .attributes
            .get_float("occi.storage.size")
            .ok_or_else(|| Error::ResourceNotValid("occi.storage.size is required".into()))?;
        if size_gb < 1.0 {
            return Err(Error::ResourceNotValid(format!(
                "volume size must be at least 1 GiB, got {}",
                size_gb
            )));
        }
        let zone = self.placement_zone(&resource)?;

        let xml = self
            .client
            .call(
                "CreateVolume",
                &[
                    ("Size".to_string(), (size_gb.ceil() as i64).to_string()),
                    ("AvailabilityZone".to_string(), zone),
                ],
                Error::ResourceCreation,
            )
            .await?;
        let created: CreateVolumeResponse = document::parse_document(&xml, "CreateVolume")?;
        self.volumes.flush();

        info!(id = %created.volume_id, "volume created");
        Ok(created.volume_id)
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
        require_id("id", id)?;
        self.client
            .call(
                "DeleteVolume",
                &[("VolumeId".to_string(), id.to_string())],
                |reason| Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                },
            )
            .await?;
        self.volumes.flush();
        debug!(id, "volume deleted");
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

impl StorageBackend for Ec2Storage {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ec2::client::QueryTransport;
    use crate::occi::{ResourceState, StorageState};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<(u16, String)>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryTransport for CannedTransport {
        async fn send(
            &self,
            _headers: Vec<(String, String)>,
            body: String,
        ) -> Result<(u16, String)> {
            self.requests.lock().push(body);
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn facade(responses: Vec<(u16, &str)>) -> (Arc<CannedTransport>, Ec2Storage) {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(
                responses.into_iter().rev().map(|(s, b)| (s, b.to_string())).collect(),
            ),
            requests: Mutex::new(vec![]),
        });
        let client = Arc::new(
            Ec2Client::new(
                transport.clone(),
                "https://ec2.eu-west-1.amazonaws.com",
                "eu-west-1",
                "AKIDEXAMPLE",
                "secret",
            )
            .unwrap(),
        );
        (transport, Ec2Storage::new(client, "eu-west-1"))
    }

    const VOLUMES_XML: &str = "<DescribeVolumesResponse><volumeSet><item>\
                               <volumeId>vol-0b15340c</volumeId>\
                               <size>10</size><status>available</status>\
                               <availabilityZone>eu-west-1a</availabilityZone>\
                               </item></volumeSet></DescribeVolumesResponse>";

    #[tokio::test]
    async fn test_get_translates_volume() {
        let (_, storage) = facade(vec![(200, VOLUMES_XML)]);

        let resource = storage.get("vol-0b15340c").await.unwrap();
        assert_eq!(resource.id, "vol-0b15340c");
        assert_eq!(resource.attributes.get_float("occi.storage.size"), Some(10.0));
        assert_eq!(
            resource.state,
            Some(ResourceState::Storage(StorageState::Online))
        );
    }

    #[tokio::test]
    async fn test_get_missing_volume_is_not_found() {
        let (_, storage) = facade(vec![(
            200,
            "<DescribeVolumesResponse><volumeSet/></DescribeVolumesResponse>",
        )]);
        assert_matches!(
            storage.get("vol-ffffffff").await,
            Err(Error::ResourceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_create_uses_size_and_default_zone() {
        let created = "<CreateVolumeResponse><volumeId>vol-new00001</volumeId>\
                       <status>creating</status></CreateVolumeResponse>";
        let (transport, storage) = facade(vec![(200, created)]);

        let mut resource = Resource::storage("new");
        resource.set_attribute("occi.storage.size", 20.0f64);
        let id = storage.create(resource).await.unwrap();
        assert_eq!(id, "vol-new00001");

        let sent = transport.requests.lock();
        assert!(sent[0].contains("Action=CreateVolume"));
        assert!(sent[0].contains("Size=20"));
        assert!(sent[0].contains("AvailabilityZone=eu-west-1a"));
    }

    #[tokio::test]
    async fn test_create_honours_zone_mixin() {
        let created = "<CreateVolumeResponse><volumeId>vol-new00002</volumeId></CreateVolumeResponse>";
        let (transport, storage) = facade(vec![(200, created)]);

        let mut resource = Resource::storage("new").with_mixin(
            "http://occi.localhost/occi/infrastructure/ec2/availability_zone#uuid_eu_west_1b_eu-west-1b",
        );
        resource.set_attribute("occi.storage.size", 1.0f64);
        storage.create(resource).await.unwrap();

        let sent = transport.requests.lock();
        assert!(sent[0].contains("AvailabilityZone=eu-west-1b"));
    }

    #[tokio::test]
    async fn test_create_without_size_is_invalid() {
        let (_, storage) = facade(vec![]);
        assert_matches!(
            storage.create(Resource::storage("new")).await,
            Err(Error::ResourceNotValid(_))
        );
    }

    #[tokio::test]
    async fn test_actions_are_not_implemented() {
        let (_, storage) = facade(vec![]);
        assert_matches!(
            storage
                .trigger_action("vol-0b15340c", &ActionInstance::storage("online"))
                .await,
            Err(Error::MethodNotImplemented { .. })
        );
    }
}
