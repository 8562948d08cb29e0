//! OpenNebula compute facade
//!
//! Translates between OCCI compute resources and oned VMs. Listing goes
//! through the per-instance pool cache; every write flushes it. Creation is
//! template-driven: the os_tpl mixin selects the platform template and a
//! rendered context fragment is merged in at instantiation. NIC and disk
//! links map onto VM sub-objects, with the target's platform id as the
//! link sub-identifier.

use super::client::{OneClient, RpcParam};
use super::document::{self, NicSection, TemplatePool, VmDocument, VmPool};
use crate::backend::pool::PoolCache;
use crate::backend::poll::{wait_until, DEFAULT_WAIT_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::backend::{
    context, id_from_reference, require_id, require_kind, Capabilities, ComputeBackend,
    OtherBackends, ResourceBackend,
};
use crate::error::{Error, Result};
use crate::occi::model::template_term;
use crate::occi::{ActionInstance, Attributes, ComputeState, Link, LinkId, LinkKind, Resource};
use crate::template::{TemplateContext, TemplateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

// one.vmpool.info selectors
const POOL_MINE: i64 = -3;
const POOL_RANGE_ALL: i64 = -1;
const VM_STATE_ANY: i64 = -1;

pub struct OneCompute {
    client: Arc<OneClient>,
    others: Arc<OtherBackends>,
    templates: Arc<TemplateStore>,
    vms: PoolCache<VmPool>,
    tpls: PoolCache<TemplatePool>,
    namespace: String,
}

impl OneCompute {
    pub fn new(
        client: Arc<OneClient>,
        others: Arc<OtherBackends>,
        templates: Arc<TemplateStore>,
        namespace: &str,
    ) -> Self {
        Self {
            client,
            others,
            templates,
            vms: PoolCache::new(),
            tpls: PoolCache::new(),
            namespace: namespace.trim_end_matches('/').to_string(),
        }
    }

    fn vm_id(id: &str) -> Result<i64> {
        require_id("id", id)?;
        id.parse()
            .map_err(|_| Error::IdentifierNotValid(id.to_string()))
    }

    async fn pool(&self) -> Result<Arc<VmPool>> {
        self.vms
            .pool("vm", "mine", false, || async {
                let xml = self
                    .client
                    .call(
                        "one.vmpool.info",
                        &[
                            POOL_MINE.into(),
                            POOL_RANGE_ALL.into(),
                            POOL_RANGE_ALL.into(),
                            VM_STATE_ANY.into(),
                        ],
                        Error::ResourceRetrieval,
                    )
                    .await?;
                document::parse_document(&xml, "VM pool")
            })
            .await
    }

    async fn fetch(&self, id: i64) -> Result<VmDocument> {
        let xml = self
            .client
            .call("one.vm.info", &[id.into()], Error::ResourceRetrieval)
            .await?;
        document::parse_document(&xml, "VM")
    }

    /// Mixin identifier for the platform template a VM was instantiated
    /// from; `None` when the template has since been deleted
    async fn os_tpl_mixin(&self, template_id: i64) -> Result<Option<String>> {
        let pool = self
            .tpls
            .pool("template", "mine", false, || async {
                let xml = self
                    .client
                    .call(
                        "one.templatepool.info",
                        &[POOL_MINE.into(), POOL_RANGE_ALL.into(), POOL_RANGE_ALL.into()],
                        Error::ResourceRetrieval,
                    )
                    .await?;
                document::parse_document(&xml, "template pool")
            })
            .await?;

        Ok(pool.templates.iter().find(|t| t.id == template_id).map(|t| {
            format!(
                "{}/os_tpl#{}",
                self.namespace,
                template_term(&t.name, &t.id.to_string())
            )
        }))
    }

    async fn to_resource(&self, vm: &VmDocument) -> Result<Resource> {
        let mut resource = Resource::compute(vm.id.to_string()).with_title(vm.name.clone());
        resource.set_compute_state(document::compute_state(vm.state, vm.lcm_state));
        resource.set_attribute("occi.compute.hostname", vm.name.clone());

        if let Some(vcpu) = vm.template.vcpu()? {
            resource.set_attribute("occi.compute.cores", vcpu);
        }
        if let Some(memory_mb) = vm.template.memory()? {
            // advertised in GiB
            resource.set_attribute("occi.compute.memory", memory_mb as f64 / 1024.0);
        }
        if let Some(arch) = vm.template.os.as_ref().and_then(|os| os.arch.clone()) {
            resource.set_attribute("occi.compute.architecture", arch);
        }

        if let Some(template_id) = vm.template.template_id()? {
            if let Some(mixin) = self.os_tpl_mixin(template_id).await? {
                resource.attach_mixin(mixin);
            }
        }

        let owner = resource.id.clone();
        for nic in &vm.template.nics {
            if let Some(network_id) = &nic.network_id {
                resource.add_link(nic_link(&owner, network_id, nic));
            }
        }
        for disk in &vm.template.disks {
            if let Some(image_id) = &disk.image_id {
                let mut link = Link::derive("compute", &owner, LinkKind::StorageLink, image_id);
                if let Some(target) = &disk.target {
                    link.set_attribute("occi.storagelink.deviceid", target.clone());
                }
                resource.add_link(link);
            }
        }
        Ok(resource)
    }

    async fn filtered(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        let mut resources = Vec::with_capacity(pool.vms.len());
        for vm in &pool.vms {
            let resource = self.to_resource(vm).await?;
            if filter.iter().all(|m| resource.mixins.contains(m)) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    /// Poll the VM out of its transitional state after a sub-object change
    async fn settle(&self, id: i64, what: &str) -> Result<()> {
        wait_until(what, DEFAULT_WAIT_TIMEOUT, DEFAULT_WAIT_INTERVAL, || async {
            let vm = self.fetch(id).await?;
            Ok(document::compute_state(vm.state, vm.lcm_state) != ComputeState::Waiting)
        })
        .await
    }

    fn parse_owned(&self, link_id: &str, kind: LinkKind) -> Result<LinkId> {
        require_id("link_id", link_id)?;
        let parsed = LinkId::parse(link_id)?;
        if parsed.kind != kind || parsed.owner_kind != "compute" {
            return Err(Error::IdentifierNotValid(link_id.to_string()));
        }
        Ok(parsed)
    }

    async fn attach(&self, link: Link, kind: LinkKind) -> Result<String> {
        let source = id_from_reference(&link.source)?;
        let target = id_from_reference(link.target.id())?;
        let vid = Self::vm_id(&source)?;
        let target_id: i64 = target
            .parse()
            .map_err(|_| Error::IdentifierNotValid(target.clone()))?;

        // Both endpoints must exist before the platform-side attach
        match kind {
            LinkKind::NetworkInterface => {
                self.others.network()?.get(&target).await?;
            }
            LinkKind::StorageLink => {
                self.others.storage()?.get(&target).await?;
            }
            LinkKind::SecurityGroupLink => {
                return Err(Error::MethodNotImplemented {
                    backend: "opennebula".into(),
                    operation: "attach securitygrouplink".into(),
                })
            }
        }
        let vm = self.fetch(vid).await?;

        let derived_id = LinkId::derive("compute", &source, kind, &target).to_string();
        let duplicate = match kind {
            LinkKind::NetworkInterface => vm
                .template
                .nics
                .iter()
                .any(|n| n.network_id.as_deref() == Some(target.as_str())),
            _ => vm
                .template
                .disks
                .iter()
                .any(|d| d.image_id.as_deref() == Some(target.as_str())),
        };
        if duplicate {
            return Err(Error::conflict(kind.term(), &derived_id));
        }

        let (method, payload) = match kind {
            LinkKind::NetworkInterface => (
                "one.vm.attachnic",
                format!("NIC = [ NETWORK_ID = {} ]", target_id),
            ),
            _ => ("one.vm.attach", format!("DISK = [ IMAGE_ID = {} ]", target_id)),
        };
        let action = format!("attach {}", kind.term());
        self.client
            .call(method, &[vid.into(), payload.into()], |reason| {
                Error::ResourceAction { action, reason }
            })
            .await?;
        self.settle(vid, kind.term()).await?;
        self.vms.flush();

        info!(link = %derived_id, "link attached");
        Ok(derived_id)
    }

    async fn detach(&self, link_id: &str, kind: LinkKind) -> Result<()> {
        let parsed = self.parse_owned(link_id, kind)?;
        let vid = Self::vm_id(&parsed.owner_id)?;
        let vm = self.fetch(vid).await?;

        // Resolve the platform-side sub-object index from the target id
        let index = match kind {
            LinkKind::NetworkInterface => vm
                .template
                .nics
                .iter()
                .find(|n| n.network_id.as_deref() == Some(parsed.sub_id.as_str()))
                .map(|n| n.nic_id),
            _ => vm
                .template
                .disks
                .iter()
                .find(|d| d.image_id.as_deref() == Some(parsed.sub_id.as_str()))
                .map(|d| d.disk_id),
        }
        .ok_or_else(|| Error::not_found(kind.term(), link_id))?;

        let method = match kind {
            LinkKind::NetworkInterface => "one.vm.detachnic",
            _ => "one.vm.detach",
        };
        let action = format!("detach {}", kind.term());
        self.client
            .call(method, &[vid.into(), index.into()], |reason| {
                Error::ResourceAction { action, reason }
            })
            .await?;
        self.settle(vid, kind.term()).await?;
        self.vms.flush();
        Ok(())
    }

    async fn get_link(&self, link_id: &str, kind: LinkKind) -> Result<Link> {
        let parsed = self.parse_owned(link_id, kind)?;
        let vid = Self::vm_id(&parsed.owner_id)?;
        let vm = self.fetch(vid).await?;
        let owner = vid.to_string();

        let mut link = match kind {
            LinkKind::NetworkInterface => vm
                .template
                .nics
                .iter()
                .find(|n| n.network_id.as_deref() == Some(parsed.sub_id.as_str()))
                .map(|n| nic_link(&owner, &parsed.sub_id, n)),
            _ => vm
                .template
                .disks
                .iter()
                .find(|d| d.image_id.as_deref() == Some(parsed.sub_id.as_str()))
                .map(|d| {
                    let mut l = Link::derive("compute", &owner, kind, &parsed.sub_id);
                    if let Some(target) = &d.target {
                        l.set_attribute("occi.storagelink.deviceid", target.clone());
                    }
                    l
                }),
        }
        .ok_or_else(|| Error::not_found(kind.term(), link_id))?;

        let lookup = match kind {
            LinkKind::NetworkInterface => self.others.network()?.get(&parsed.sub_id).await,
            _ => self.others.storage()?.get(&parsed.sub_id).await,
        };
        match lookup {
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

fn nic_link(owner: &str, network_id: &str, nic: &NicSection) -> Link {
    let mut link = Link::derive("compute", owner, LinkKind::NetworkInterface, network_id);
    link.set_attribute("occi.networkinterface.interface", format!("eth{}", nic.nic_id));
    if let Some(ip) = &nic.ip {
        link.set_attribute("occi.networkinterface.address", ip.clone());
    }
    if let Some(mac) = &nic.mac {
        link.set_attribute("occi.networkinterface.mac", mac.clone());
    }
    link
}

/// Platform template id encoded in an os_tpl mixin term (`uuid_{name}_{id}`)
fn template_id_from_mixin(identifier: &str) -> Result<i64> {
    identifier
        .rsplit('#')
        .next()
        .and_then(|term| term.rsplit('_').next())
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| {
            Error::ResourceNotValid(format!(
                "os_tpl mixin {} does not carry a platform template id",
                identifier
            ))
        })
}

#[async_trait]
impl ResourceBackend for OneCompute {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            update: false,
            partial_update: false,
            ..Capabilities::full("opennebula")
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        self.filtered(filter).await
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        if filter.is_empty() {
            // No mixin filter, so translation can be skipped entirely
            return Ok(self.pool().await?.vms.iter().map(|vm| vm.id.to_string()).collect());
        }
        Ok(self.filtered(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        let vm = self.fetch(Self::vm_id(id)?).await?;
        self.to_resource(&vm).await
    }

    async fn create(&self, resource: Resource) -> Result<String> {
        require_kind(&resource, "compute")?;
        let os_tpl = resource.require_single_mixin("os_tpl")?;
        let template_id = template_id_from_mixin(os_tpl)?;

        let mut ctx = TemplateContext::new();
        let name = resource
            .title
            .clone()
            .unwrap_or_else(|| format!("occi-{}", resource.id));
        ctx.insert("name".into(), name.clone());

        if let Some(key) = resource.attributes.get_str("occi.credentials.ssh.publickey") {
            context::validate_ssh_public_key(key)?;
            ctx.insert("ssh_public_key".into(), key.to_string());
        }
        if let Some(data) = resource.attributes.get_str("occi.compute.userdata") {
            context::validate_user_data(data)?;
            ctx.insert("user_data".into(), data.to_string());
        }
        let extra = self.templates.render("compute.tpl", &ctx)?;

        let id = self
            .client
            .call(
                "one.template.instantiate",
                &[
                    template_id.into(),
                    name.into(),
                    false.into(),
                    extra.into(),
                    false.into(),
                ],
                Error::ResourceCreation,
            )
            .await?;
        self.vms.flush();

        info!(id = %id, template_id, "VM instantiated");
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
        let vid = Self::vm_id(id)?;
        self.client
            .call(
                "one.vm.action",
                &[RpcParam::from("terminate-hard"), vid.into()],
                |reason| Error::ResourceAction {
                    action: "delete".into(),
                    reason,
                },
            )
            .await?;
        self.vms.flush();
        debug!(id, "VM terminated");
        Ok(())
    }

    async fn delete_all(&self, filter: &[String]) -> Result<()> {
        for id in self.list_ids(filter).await? {
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn trigger_action(&self, id: &str, action: &ActionInstance) -> Result<()> {
        let vid = Self::vm_id(id)?;
        let term = action.term();
        let op = match term {
            "start" => "resume",
            "stop" => "poweroff",
            "restart" => "reboot",
            "suspend" => "suspend",
            _ => return Err(Error::ActionNotImplemented(action.action.identifier())),
        };

        let vm = self.fetch(vid).await?;
        let state = document::compute_state(vm.state, vm.lcm_state);
        if !state.allows(term) {
            return Err(Error::ResourceState {
                state: state.to_string(),
                reason: format!("action {} not available", term),
            });
        }

        let action_term = term.to_string();
        self.client
            .call(
                "one.vm.action",
                &[RpcParam::from(op), vid.into()],
                |reason| Error::ResourceAction {
                    action: action_term,
                    reason,
                },
            )
            .await?;
        self.vms.flush();
        Ok(())
    }
}

#[async_trait]
impl ComputeBackend for OneCompute {
    async fn attach_network(&self, link: Link) -> Result<String> {
        self.attach(link, LinkKind::NetworkInterface).await
    }

    async fn detach_network(&self, link_id: &str) -> Result<()> {
        self.detach(link_id, LinkKind::NetworkInterface).await
    }

    async fn get_network_link(&self, link_id: &str) -> Result<Link> {
        self.get_link(link_id, LinkKind::NetworkInterface).await
    }

    async fn attach_storage(&self, link: Link) -> Result<String> {
        self.attach(link, LinkKind::StorageLink).await
    }

    async fn detach_storage(&self, link_id: &str) -> Result<()> {
        self.detach(link_id, LinkKind::StorageLink).await
    }

    async fn get_storage_link(&self, link_id: &str) -> Result<Link> {
        self.get_link(link_id, LinkKind::StorageLink).await
    }
}

// =============================================================================
// Tests
// =============================================================================
