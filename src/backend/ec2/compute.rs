//! EC2 compute facade
//!
//! Translates between OCCI compute resources and EC2 instances. The AMI is
//! selected by the os_tpl mixin, the instance type by the resource_tpl
//! mixin. EBS attachments map onto storagelinks with the volume id as the
//! sub-identifier; network interfaces are fixed at launch on EC2, so the
//! networkinterface side is read-only. The active state advertises the
//! shared action set including `suspend`, but this Query API version has no
//! suspend call, so dispatching it reports the action as unimplemented.

use super::client::Ec2Client;
use super::document::{
    self, DescribeImagesResponse, DescribeInstancesResponse, InstanceItem, RunInstancesResponse,
};
use crate::backend::pool::PoolCache;
use crate::backend::poll::{wait_until, DEFAULT_WAIT_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::backend::{
    context, id_from_reference, require_id, require_kind, Capabilities, ComputeBackend,
    OtherBackends, ResourceBackend,
};
use crate::error::{Error, Result};
use crate::occi::model::template_term;
use crate::occi::{ActionInstance, Attributes, Link, LinkId, LinkKind, Resource};
use crate::store::KeyValueStoreRef;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

/// Attachment slots offered to EBS volumes, in allocation order
const DEVICE_LETTERS: &[char] = &['f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'p'];

pub struct Ec2Compute {
    client: Arc<Ec2Client>,
    others: Arc<OtherBackends>,
    store: KeyValueStoreRef,
    namespace: String,
    /// DescribeImages filter matching the configured exposure policy
    image_params: Vec<(String, String)>,
    instances: PoolCache<DescribeInstancesResponse>,
    images: PoolCache<DescribeImagesResponse>,
}

impl Ec2Compute {
    pub fn new(
        client: Arc<Ec2Client>,
        others: Arc<OtherBackends>,
        store: KeyValueStoreRef,
        namespace: &str,
        image_params: Vec<(String, String)>,
    ) -> Self {
        Self {
            client,
            others,
            store,
            namespace: namespace.trim_end_matches('/').to_string(),
            image_params,
            instances: PoolCache::new(),
            images: PoolCache::new(),
        }
    }

    async fn pool(&self) -> Result<Arc<DescribeInstancesResponse>> {
        self.instances
            .pool("instance", "all", false, || async {
                let xml = self
                    .client
                    .call("DescribeInstances", &[], Error::ResourceRetrieval)
                    .await?;
                document::parse_document(&xml, "DescribeInstances")
            })
            .await
    }

    async fn fetch(&self, id: &str) -> Result<InstanceItem> {
        require_id("id", id)?;
        let xml = self
            .client
            .call(
                "DescribeInstances",
                &[("InstanceId.1".to_string(), id.to_string())],
                Error::ResourceRetrieval,
            )
            .await?;
        let doc: DescribeInstancesResponse = document::parse_document(&xml, "DescribeInstances")?;
        let item = doc.instances().next().cloned();
        item.ok_or_else(|| Error::not_found("compute", id))
    }

    /// Mixin identifier for the AMI an instance was launched from; `None`
    /// when the image is outside the configured exposure policy
    async fn os_tpl_mixin(&self, image_id: &str) -> Result<Option<String>> {
        let pool = self
            .images
            .pool("image", "policy", false, || async {
                let xml = self
                    .client
                    .call("DescribeImages", &self.image_params, Error::ResourceRetrieval)
                    .await?;
                document::parse_document(&xml, "DescribeImages")
            })
            .await?;

        Ok(pool
            .images
            .items
            .iter()
            .find(|i| i.image_id == image_id)
            .map(|i| {
                let name = i.name.as_deref().unwrap_or(&i.image_id);
                format!("{}/os_tpl#{}", self.namespace, template_term(name, &i.image_id))
            }))
    }

    async fn to_resource(&self, instance: &InstanceItem) -> Result<Resource> {
        let id = instance.instance_id.clone();
        let mut resource = Resource::compute(id.clone()).with_title(id.clone());
        resource.set_compute_state(document::compute_state(&instance.state.name));
        resource.set_attribute("occi.compute.hostname", id.clone());

        if let Some(image_id) = &instance.image_id {
            if let Some(mixin) = self.os_tpl_mixin(image_id).await? {
                resource.attach_mixin(mixin);
            }
        }
        if let Some(instance_type) = &instance.instance_type {
            resource.attach_mixin(format!(
                "{}/resource_tpl#{}",
                self.namespace,
                template_term(instance_type, instance_type)
            ));
        }
        if let Some(zone) = instance
            .placement
            .as_ref()
            .and_then(|p| p.availability_zone.as_deref())
        {
            resource.attach_mixin(format!(
                "{}/availability_zone#{}",
                self.namespace,
                template_term(zone, zone)
            ));
        }

        if let Some(vpc) = &instance.vpc_id {
            let mut link = Link::derive("compute", &id, LinkKind::NetworkInterface, vpc);
            if let Some(ip) = &instance.private_ip {
                link.set_attribute("occi.networkinterface.address", ip.clone());
            }
            resource.add_link(link);
        }
        for device in &instance.block_devices.items {
            if let Some(ebs) = &device.ebs {
                let mut link =
                    Link::derive("compute", &id, LinkKind::StorageLink, &ebs.volume_id);
                link.set_attribute("occi.storagelink.deviceid", device.device_name.clone());
                resource.add_link(link);
            }
        }
        Ok(resource)
    }

    async fn filtered(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        let mut resources = Vec::new();
        for instance in pool.instances() {
            let resource = self.to_resource(instance).await?;
            if filter.iter().all(|m| resource.mixins.contains(m)) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    fn parse_owned(link_id: &str, kind: LinkKind) -> Result<LinkId> {
        require_id("link_id", link_id)?;
        let parsed = LinkId::parse(link_id)?;
        if parsed.kind != kind || parsed.owner_kind != "compute" {
            return Err(Error::IdentifierNotValid(link_id.to_string()));
        }
        Ok(parsed)
    }

    /// Pick the next free `/dev/sdX` slot. The last-assigned letter is kept
    /// per instance in the shared store, so a slot freed by a recent detach
    /// is not immediately reused (EC2 rejects that until the kernel catches
    /// up).
    async fn next_device(&self, instance_id: &str, in_use: Vec<String>) -> Result<String> {
        let key = format!("ec2_last_device_{}", instance_id);
        let chosen = Arc::new(Mutex::new(None));
        let slot = chosen.clone();

        self.store
            .update(
                &key,
                Box::new(move |last| {
                    let start = last
                        .as_deref()
                        .and_then(|l| l.chars().next())
                        .and_then(|l| DEVICE_LETTERS.iter().position(|&c| c == l))
                        .map(|i| i + 1)
                        .unwrap_or(0);
                    for offset in 0..DEVICE_LETTERS.len() {
                        let letter = DEVICE_LETTERS[(start + offset) % DEVICE_LETTERS.len()];
                        let device = format!("/dev/sd{}", letter);
                        if !in_use.contains(&device) {
                            *slot.lock() = Some(device);
                            return Some(letter.to_string());
                        }
                    }
                    last
                }),
            )
            .await?;

        let device = chosen.lock().take();
        device.ok_or_else(|| {
            Error::ResourceCreation(format!("no free device slot on {}", instance_id))
        })
    }

    fn has_volume(instance: &InstanceItem, volume_id: &str) -> bool {
        instance
            .block_devices
            .items
            .iter()
            .any(|d| d.ebs.as_ref().map(|e| e.volume_id.as_str()) == Some(volume_id))
    }
}

/// Platform id encoded in a template-class mixin term (`uuid_{name}_{id}`)
fn platform_id_from_mixin(identifier: &str) -> Result<&str> {
    identifier
        .rsplit('#')
        .next()
        .and_then(|term| term.rsplit('_').next())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::ResourceNotValid(format!(
                "mixin {} does not carry a platform id",
                identifier
            ))
        })
}

#[async_trait]
impl ResourceBackend for Ec2Compute {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            ..Capabilities::full("ec2")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        self.filtered(filter).await
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        if filter.is_empty() {
            return Ok(self
                .pool()
                .await?
                .instances()
                .map(|i| i.instance_id.clone())
                .collect());
        }
        Ok(self.filtered(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let instance = self.fetch(id).await?;
        self.to_resource(&instance).await
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "compute")?;
        let os_tpl = resource.require_single_mixin("os_tpl")?;
        let image_id = platform_id_from_mixin(os_tpl)?;
        if !image_id.starts_with("ami-") {
            return Err(Error::ResourceNotValid(format!(
                "os_tpl mixin {} does not name an AMI",
                os_tpl
            )));
        }

        let instance_type = match resource.mixin_instances_of("resource_tpl").first() {
            Some(mixin) => platform_id_from_mixin(mixin)?.to_string(),
            None => DEFAULT_INSTANCE_TYPE.to_string(),
        };

        let mut params = vec![
            ("ImageId".to_string(), image_id.to_string()),
            ("InstanceType".to_string(), instance_type),
            ("MinCount".to_string(), "1".to_string()),
            ("MaxCount".to_string(), "1".to_string()),
        ];
        if let Some(data) = resource.attributes.get_str("occi.compute.userdata") {
            context::validate_user_data(data)?;
            params.push(("UserData".to_string(), data.to_string()));
        }

        let xml = self
            .client
            .call("RunInstances", &params, Error::ResourceCreation)
            .await?;
        let run: RunInstancesResponse = document::parse_document(&xml, "RunInstances")?;
        let id = run
            .instances
            .items
            .first()
            .map(|i| i.instance_id.clone())
            .ok_or_else(|| Error::ResourceCreation("no instance in RunInstances response".into()))?;
        self.instances.flush();

        info!(id = %id, image_id, "instance launched");
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
        require_id("id", id)?;
        self.client
            .call(
                "TerminateInstances",
                &[("InstanceId.1".to_string(), id.to_string())],
                |reason| Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                },
            )
            .await?;
        self.instances.flush();
        debug!(id, "instance terminated");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()> {
        let term = action.term();
        let operation = match term {
            "start" => "StartInstances",
            "stop" => "StopInstances",
            "restart" => "RebootInstances",
            // EC2 has no suspend
            _ => return Err(Error::ActionNotImplemented(action.action.identifier())),
        };

        let instance = self.fetch(id).await?;
        let state = document::compute_state(&instance.state.name);
        if !state.allows(term) {
            return Err(Error::ResourceState {
                state: state.to_string(),
                reason: format!("action {} not available", term),
            });
        }

        let action_term = term.to_string();
        self.client
            .call(
                operation,
                &[("InstanceId.1".to_string(), id.to_string())],
                |reason| Error::ResourceAction {
                    action: action_term,
                    reason,
                },
            )
            .await?;
        self.instances.flush();
        Ok(())
    }
}

#[async_trait]
impl ComputeBackend for Ec2Compute {
    async fn attach_network(&self, _link: Link) -> Result<String> {
        Err(Error::MethodNotImplemented {
            backend: "ec2".into(),
            operation: "attach networkinterface".into(),
        })
    }

    async fn detach_network(&self, _link_id: &str) -> Result<()> {
        Err(Error::MethodNotImplemented {
            backend: "ec2".into(),
            operation: "detach networkinterface".into(),
        })
    }

    async fn get_network_link(&self, link_id: &str) -> Result<Link> {
        let parsed = Self::parse_owned(link_id, LinkKind::NetworkInterface)?;
        let instance = self.fetch(&parsed.owner_id).await?;
        if instance.vpc_id.as_deref() != Some(parsed.sub_id.as_str()) {
            return Err(Error::not_found("networkinterface", link_id));
        }
        let mut link = Link::derive(
            "compute",
            &parsed.owner_id,
            LinkKind::NetworkInterface,
            &parsed.sub_id,
        );
        if let Some(ip) = &instance.private_ip {
            link.set_attribute("occi.networkinterface.address", ip.clone());
        }
        Ok(link)
    }

    async fn attach_storage(&self, link: Link) -> Result<String> {
        let source = id_from_reference(&link.source)?;
        let target = id_from_reference(link.target.id())?;

        // Both endpoints must exist before the platform-side attach
        self.others.storage()?.get(&target).await?;
        let instance = self.fetch(&source).await?;

        let derived_id =
            LinkId::derive("compute", &source, LinkKind::StorageLink, &target).to_string();
        if Self::has_volume(&instance, &target) {
            return Err(Error::conflict("storagelink", &derived_id));
        }

        let in_use: Vec<String> = instance
            .block_devices
            .items
            .iter()
            .map(|d| d.device_name.clone())
            .collect();
        let device = self.next_device(&source, in_use).await?;

        self.client
            .call(
                "AttachVolume",
                &[
                    ("VolumeId".to_string(), target.clone()),
                    ("InstanceId".to_string(), source.clone()),
                    ("Device".to_string(), device),
                ],
                |reason| Error::ResourceAction {
                    action: "attach storagelink".into(),
                    reason,
                },
            )
            .await?;

        wait_until("storagelink", DEFAULT_WAIT_TIMEOUT, DEFAULT_WAIT_INTERVAL, || async {
            let instance = self.fetch(&source).await?;
            Ok(Self::has_volume(&instance, &target))
        })
        .await?;
        self.instances.flush();

        info!(link = %derived_id, "volume attached");
        Ok(derived_id)
    }

    async fn detach_storage(&self, link_id: &str) -> Result<()> {
        let parsed = Self::parse_owned(link_id, LinkKind::StorageLink)?;
        let instance = self.fetch(&parsed.owner_id).await?;
        if !Self::has_volume(&instance, &parsed.sub_id) {
            return Err(Error::not_found("storagelink", link_id));
        }

        self.client
            .call(
                "DetachVolume",
                &[
                    ("VolumeId".to_string(), parsed.sub_id.clone()),
                    ("InstanceId".to_string(), parsed.owner_id.clone()),
                ],
                |reason| Error::ResourceAction {
                    action: "detach storagelink".into(),
                    reason,
                },
            )
            .await?;

        wait_until("storagelink", DEFAULT_WAIT_TIMEOUT, DEFAULT_WAIT_INTERVAL, || async {
            let instance = self.fetch(&parsed.owner_id).await?;
            Ok(!Self::has_volume(&instance, &parsed.sub_id))
        })
        .await?;
        self.instances.flush();
        Ok(())
    }

    async fn get_storage_link(&self, link_id: &str) -> Result<Link> {
        let parsed = Self::parse_owned(link_id, LinkKind::StorageLink)?;
        let instance = self.fetch(&parsed.owner_id).await?;
        let device = instance
            .block_devices
            .items
            .iter()
            .find(|d| d.ebs.as_ref().map(|e| e.volume_id.as_str()) == Some(parsed.sub_id.as_str()))
            .ok_or_else(|| Error::not_found("storagelink", link_id))?;

        let mut link = Link::derive(
            "compute",
            &parsed.owner_id,
            LinkKind::StorageLink,
            &parsed.sub_id,
        );
        link.set_attribute("occi.storagelink.deviceid", device.device_name.clone());

        match self.others.storage()?.get(&parsed.sub_id).await {
            Ok(_) => {}
            Err(Error::ResourceNotFound { .. }) | Err(Error::Authorization(_)) => {
                warn!(link = %link_id, "link target missing, substituting placeholder");
                link.target = Resource::placeholder_target(&link, "target no longer exists");
            }
            Err(other) => return Err(other),
        }
        Ok(link)
    }
}

// =============================================================================
// Tests
// =============================================================================
