//! Typed views over EC2 Query API responses
//!
//! EC2 wraps every collection in `<xxxSet><item>...</item></xxxSet>`; the
//! generic [`ItemList`] models that shape once. Only the fields the
//! translators rely on are declared.

use crate::error::{Error, Result};
use crate::occi::{ComputeState, NetworkState, StorageState};
use serde::Deserialize;

pub fn parse_document<'a, T: Deserialize<'a>>(xml: &'a str, what: &str) -> Result<T> {
    quick_xml::de::from_str(xml)
        .map_err(|e| Error::ResourceRetrieval(format!("cannot parse {} response: {}", what, e)))
}

/// `<item>`-wrapped collection
#[derive(Debug, Clone, Deserialize)]
pub struct ItemList<T> {
    // path form keeps the derive from demanding `T: Default`
    #[serde(rename = "item", default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Default for ItemList<T> {
    fn default() -> Self {
        Self { items: vec![] }
    }
}

// =============================================================================
// Instances
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeInstancesResponse {
    #[serde(rename = "reservationSet", default)]
    pub reservations: ItemList<Reservation>,
}

impl DescribeInstancesResponse {
    pub fn instances(&self) -> impl Iterator<Item = &InstanceItem> {
        self.reservations
            .items
            .iter()
            .flat_map(|r| r.instances.items.iter())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reservation {
    #[serde(rename = "instancesSet", default)]
    pub instances: ItemList<InstanceItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceItem {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "imageId", default)]
    pub image_id: Option<String>,
    #[serde(rename = "instanceType", default)]
    pub instance_type: Option<String>,
    #[serde(rename = "instanceState", default)]
    pub state: InstanceState,
    #[serde(rename = "placement", default)]
    pub placement: Option<Placement>,
    #[serde(rename = "vpcId", default)]
    pub vpc_id: Option<String>,
    #[serde(rename = "privateIpAddress", default)]
    pub private_ip: Option<String>,
    #[serde(rename = "blockDeviceMapping", default)]
    pub block_devices: ItemList<BlockDeviceItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceState {
    #[serde(rename = "name", default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Placement {
    #[serde(rename = "availabilityZone", default)]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockDeviceItem {
    #[serde(rename = "deviceName")]
    pub device_name: String,
    #[serde(rename = "ebs", default)]
    pub ebs: Option<EbsItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbsItem {
    #[serde(rename = "volumeId", default)]
    pub volume_id: String,
    #[serde(rename = "status", default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunInstancesResponse {
    #[serde(rename = "instancesSet", default)]
    pub instances: ItemList<InstanceItem>,
}

// =============================================================================
// Volumes
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeVolumesResponse {
    #[serde(rename = "volumeSet", default)]
    pub volumes: ItemList<VolumeItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeItem {
    #[serde(rename = "volumeId")]
    pub volume_id: String,
    /// GiB
    #[serde(rename = "size", default)]
    size: Option<String>,
    #[serde(rename = "status", default)]
    pub status: String,
    #[serde(rename = "availabilityZone", default)]
    pub availability_zone: Option<String>,
}

impl VolumeItem {
    pub fn size_gb(&self) -> Result<Option<i64>> {
        match &self.size {
            None => Ok(None),
            Some(text) => text.trim().parse().map(Some).map_err(|_| {
                Error::ResourceRetrieval(format!("non-numeric volume size: {}", text))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVolumeResponse {
    #[serde(rename = "volumeId")]
    pub volume_id: String,
}

// =============================================================================
// Images / VPCs / zones
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeImagesResponse {
    #[serde(rename = "imagesSet", default)]
    pub images: ItemList<ImageItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageItem {
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeVpcsResponse {
    #[serde(rename = "vpcSet", default)]
    pub vpcs: ItemList<VpcItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VpcItem {
    #[serde(rename = "vpcId")]
    pub vpc_id: String,
    #[serde(rename = "state", default)]
    pub state: String,
    #[serde(rename = "cidrBlock", default)]
    pub cidr_block: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeAvailabilityZonesResponse {
    #[serde(rename = "availabilityZoneInfo", default)]
    pub zones: ItemList<ZoneItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneItem {
    #[serde(rename = "zoneName")]
    pub zone_name: String,
    #[serde(rename = "zoneState", default)]
    pub zone_state: String,
}

// =============================================================================
// State derivation
// =============================================================================

/// Deterministic instance state table. Unknown platform states map to the
/// most conservative OCCI state.
pub fn compute_state(name: &str) -> ComputeState {
    match name {
        "running" => ComputeState::Active,
        "pending" | "stopping" | "shutting-down" => ComputeState::Waiting,
        "stopped" | "terminated" => ComputeState::Inactive,
        _ => ComputeState::Inactive,
    }
}

pub fn storage_state(status: &str) -> StorageState {
    match status {
        "available" | "in-use" => StorageState::Online,
        "error" => StorageState::Error,
        _ => StorageState::Offline,
    }
}

pub fn network_state(state: &str) -> NetworkState {
    match state {
        "available" => NetworkState::Active,
        _ => NetworkState::Inactive,
    }
}
