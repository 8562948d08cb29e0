//! Typed views over OpenNebula XML documents
//!
//! oned returns entity state as XML documents (`<VM>`, `<VNET>`, `<IMAGE>`,
//! pools thereof). These structs declare the fields the translators rely on;
//! everything numeric inside `<TEMPLATE>` arrives as text and is exposed
//! through parsing accessors, so a missing or mistyped field is caught at
//! the access site instead of flowing on as an empty string.

use crate::error::{Error, Result};
use crate::occi::{ComputeState, StorageState};
use serde::Deserialize;

pub fn parse_document<'a, T: Deserialize<'a>>(xml: &'a str, what: &str) -> Result<T> {
    quick_xml::de::from_str(xml)
        .map_err(|e| Error::ResourceRetrieval(format!("cannot parse {} document: {}", what, e)))
}

// =============================================================================
// VM
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmPool {
    #[serde(rename = "VM", default)]
    pub vms: Vec<VmDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmDocument {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "STATE")]
    pub state: i32,
    #[serde(rename = "LCM_STATE", default)]
    pub lcm_state: i32,
    #[serde(rename = "TEMPLATE", default)]
    pub template: VmTemplate,
    #[serde(rename = "HISTORY_RECORDS", default)]
    pub history: HistoryRecords,
}

impl VmDocument {
    /// Cluster id of the current placement, if the VM ever ran
    pub fn cluster_id(&self) -> Option<i64> {
        self.history.entries.last().and_then(|h| h.cid)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecords {
    #[serde(rename = "HISTORY", default)]
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "CID", default)]
    pub cid: Option<i64>,
    #[serde(rename = "HOSTNAME", default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmTemplate {
    #[serde(rename = "CPU", default)]
    cpu: Option<String>,
    #[serde(rename = "VCPU", default)]
    vcpu: Option<String>,
    #[serde(rename = "MEMORY", default)]
    memory: Option<String>,
    #[serde(rename = "TEMPLATE_ID", default)]
    template_id: Option<String>,
    #[serde(rename = "OS", default)]
    pub os: Option<OsSection>,
    #[serde(rename = "NIC", default)]
    pub nics: Vec<NicSection>,
    #[serde(rename = "DISK", default)]
    pub disks: Vec<DiskSection>,
    #[serde(rename = "CONTEXT", default)]
    pub context: Option<ContextSection>,
}

fn parse_num(field: &str, raw: &Option<String>) -> Result<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(text) => text.trim().parse().map(Some).map_err(|_| {
            Error::ResourceRetrieval(format!("non-numeric {} in VM template: {}", field, text))
        }),
    }
}

impl VmTemplate {
    pub fn vcpu(&self) -> Result<Option<i64>> {
        parse_num("VCPU", &self.vcpu)
    }

    pub fn cpu(&self) -> Result<Option<f64>> {
        match &self.cpu {
            None => Ok(None),
            Some(text) => text.trim().parse().map(Some).map_err(|_| {
                Error::ResourceRetrieval(format!("non-numeric CPU in VM template: {}", text))
            }),
        }
    }

    /// Memory in MiB
    pub fn memory(&self) -> Result<Option<i64>> {
        parse_num("MEMORY", &self.memory)
    }

    pub fn template_id(&self) -> Result<Option<i64>> {
        parse_num("TEMPLATE_ID", &self.template_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsSection {
    #[serde(rename = "ARCH", default)]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NicSection {
    #[serde(rename = "NIC_ID")]
    pub nic_id: i64,
    #[serde(rename = "NETWORK_ID", default)]
    pub network_id: Option<String>,
    #[serde(rename = "IP", default)]
    pub ip: Option<String>,
    #[serde(rename = "MAC", default)]
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskSection {
    #[serde(rename = "DISK_ID")]
    pub disk_id: i64,
    #[serde(rename = "IMAGE_ID", default)]
    pub image_id: Option<String>,
    #[serde(rename = "TARGET", default)]
    pub target: Option<String>,
    #[serde(rename = "SIZE", default)]
    pub size_mb: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextSection {
    #[serde(rename = "SSH_PUBLIC_KEY", default)]
    pub ssh_public_key: Option<String>,
    #[serde(rename = "USER_DATA", default)]
    pub user_data: Option<String>,
}

// =============================================================================
// VNET / IMAGE
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VnetPool {
    #[serde(rename = "VNET", default)]
    pub vnets: Vec<VnetDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VnetDocument {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "TEMPLATE", default)]
    pub template: VnetTemplate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VnetTemplate {
    #[serde(rename = "NETWORK_ADDRESS", default)]
    pub network_address: Option<String>,
    #[serde(rename = "NETWORK_MASK", default)]
    pub network_mask: Option<String>,
    #[serde(rename = "GATEWAY", default)]
    pub gateway: Option<String>,
    #[serde(rename = "VLAN_ID", default)]
    pub vlan_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagePool {
    #[serde(rename = "IMAGE", default)]
    pub images: Vec<ImageDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageDocument {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "STATE", default)]
    pub state: i32,
    /// MiB
    #[serde(rename = "SIZE", default)]
    pub size_mb: Option<String>,
    #[serde(rename = "PERSISTENT", default)]
    pub persistent: Option<String>,
}

impl ImageDocument {
    pub fn size_mb(&self) -> Result<Option<i64>> {
        parse_num("SIZE", &self.size_mb)
    }
}

// =============================================================================
// Templates / clusters (model extension)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatePool {
    #[serde(rename = "VMTEMPLATE", default)]
    pub templates: Vec<TemplateDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDocument {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterPool {
    #[serde(rename = "CLUSTER", default)]
    pub clusters: Vec<ClusterDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDocument {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NAME")]
    pub name: String,
}

// =============================================================================
// State derivation
// =============================================================================

// oned VM states
const VM_ACTIVE: i32 = 3;
const VM_STOPPED: i32 = 4;
const VM_SUSPENDED: i32 = 5;
const VM_FAILED: i32 = 7;
const VM_POWEROFF: i32 = 8;
const VM_UNDEPLOYED: i32 = 9;
// LCM sub-state while ACTIVE
const LCM_RUNNING: i32 = 3;

/// Deterministic VM state table. Unknown platform states map to the most
/// conservative OCCI state.
pub fn compute_state(state: i32, lcm_state: i32) -> ComputeState {
    match state {
        VM_ACTIVE if lcm_state == LCM_RUNNING => ComputeState::Active,
        VM_ACTIVE => ComputeState::Waiting,
        VM_SUSPENDED => ComputeState::Suspended,
        VM_STOPPED | VM_POWEROFF | VM_UNDEPLOYED => ComputeState::Inactive,
        VM_FAILED => ComputeState::Error,
        0..=2 => ComputeState::Waiting,
        _ => ComputeState::Inactive,
    }
}

// oned image states
const IMG_READY: i32 = 1;
const IMG_USED: i32 = 2;
const IMG_DISABLED: i32 = 3;
const IMG_ERROR: i32 = 5;

pub fn storage_state(state: i32) -> StorageState {
    match state {
        IMG_READY | IMG_USED => StorageState::Online,
        IMG_DISABLED => StorageState::Offline,
        IMG_ERROR => StorageState::Error,
        _ => StorageState::Offline,
    }
}
