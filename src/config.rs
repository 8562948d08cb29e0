//! Bridge configuration
//!
//! One section per backend family. Transport timeouts are passed once at
//! client construction; nothing below the facade takes per-call timeouts.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Dummy
// =============================================================================

/// Configuration for the fixture-based Dummy backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyConfig {
    /// Directory holding one fixture JSON document per resource kind
    pub fixtures_dir: PathBuf,
    /// Delegated user the store keys are scoped by
    pub user: String,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: PathBuf::from("etc/fixtures"),
            user: "default".to_string(),
        }
    }
}

// =============================================================================
// OpenNebula
// =============================================================================

/// Configuration for the OpenNebula backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpennebulaConfig {
    /// XML-RPC endpoint
    pub endpoint: String,
    /// `user:token` credential string
    pub credentials: String,
    /// Transport timeout in seconds
    pub timeout_secs: u64,
    /// Directory holding allocation templates
    pub templates_dir: PathBuf,
    /// Mixin namespace the model extender rewrites schemes into
    pub namespace: String,
}

impl Default for OpennebulaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:2633/RPC2".to_string(),
            credentials: String::new(),
            timeout_secs: 30,
            templates_dir: PathBuf::from("etc/templates/opennebula"),
            namespace: "http://occi.localhost/occi/infrastructure/opennebula".to_string(),
        }
    }
}

impl OpennebulaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// EC2
// =============================================================================

/// Which images the EC2 backend exposes as os_tpl mixins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFilteringPolicy {
    All,
    Owned,
    Listed,
}

/// Configuration for the EC2 backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ec2Config {
    /// Query API endpoint
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub timeout_secs: u64,
    /// Image exposure policy; `listed` requires `image_list`
    pub image_filtering: ImageFilteringPolicy,
    /// Explicit AMI ids for the `listed` policy
    #[serde(default)]
    pub image_list: Vec<String>,
    pub namespace: String,
}

impl Default for Ec2Config {
    fn default() -> Self {
        Self {
            endpoint: "https://ec2.eu-west-1.amazonaws.com".to_string(),
            region: "eu-west-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            timeout_secs: 30,
            image_filtering: ImageFilteringPolicy::Owned,
            image_list: vec![],
            namespace: "http://occi.localhost/occi/infrastructure/ec2".to_string(),
        }
    }
}

impl Ec2Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The `listed` policy without an image list is unusable, so reject it
    /// at construction rather than on first listing call.
    pub fn validate(&self) -> Result<()> {
        if self.image_filtering == ImageFilteringPolicy::Listed && self.image_list.is_empty() {
            return Err(Error::Configuration(
                "image_filtering=listed requires a non-empty image_list".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// NOW
// =============================================================================

/// Configuration for the NOW network-management backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowConfig {
    /// REST endpoint
    pub endpoint: String,
    /// Delegated user forwarded to the service
    pub user: String,
    pub timeout_secs: u64,
}

impl Default for NowConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9292".to_string(),
            user: "default".to_string(),
            timeout_secs: 30,
        }
    }
}

impl NowConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Umbrella
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Active backend family name
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub dummy: DummyConfig,
    #[serde(default)]
    pub opennebula: OpennebulaConfig,
    #[serde(default)]
    pub ec2: Ec2Config,
    #[serde(default)]
    pub now: NowConfig,
}

fn default_backend() -> String {
    "dummy".to_string()
}

impl BridgeConfig {
    /// Load from a JSON file; an absent path yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {}", path.display(), e))
                })?;
                let config: BridgeConfig = serde_json::from_str(&raw)?;
                Ok(config)
            }
            None => Ok(Self {
                backend: default_backend(),
                ..Self::default()
            }),
        }
    }
}
