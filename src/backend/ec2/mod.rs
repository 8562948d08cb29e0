//! EC2 backend
//!
//! Facades over the EC2 Query API. Every call funnels through
//! [`client::Ec2Client`], which owns request signing and the AWS error
//! translation; the facades above it deal only in taxonomy errors and OCCI
//! resources.

mod client;
mod compute;
mod document;
mod network;
mod storage;

pub use client::{Ec2Client, HttpsTransport, QueryTransport};
pub use compute::Ec2Compute;
pub use network::Ec2Network;
pub use storage::Ec2Storage;

use crate::backend::{BackendProxy, ModelExtender, ModelExtenderRef, OtherBackends};
use crate::config::{Ec2Config, ImageFilteringPolicy};
use crate::error::{Error, Result};
use crate::occi::Model;
use crate::store::KeyValueStoreRef;
use async_trait::async_trait;
use document::{DescribeAvailabilityZonesResponse, DescribeImagesResponse};
use std::sync::Arc;
use tracing::info;

/// Fixed resource_tpl flavors advertised by this backend; EC2 has no API to
/// enumerate instance types at this API version
const INSTANCE_TYPES: &[&str] = &["t2.micro", "t2.medium", "m5.large", "m5.xlarge", "c5.large"];

/// DescribeImages filter for the configured image exposure policy
fn image_filter_params(config: &Ec2Config) -> Vec<(String, String)> {
    match config.image_filtering {
        ImageFilteringPolicy::All => vec![],
        ImageFilteringPolicy::Owned => vec![("Owner.1".to_string(), "self".to_string())],
        ImageFilteringPolicy::Listed => config
            .image_list
            .iter()
            .enumerate()
            .map(|(i, ami)| (format!("ImageId.{}", i + 1), ami.clone()))
            .collect(),
    }
}

/// Build the EC2 facade family and its model extender
pub fn build(
    config: &Ec2Config,
    store: KeyValueStoreRef,
) -> Result<(BackendProxy, ModelExtenderRef)> {
    config.validate()?;
    if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
        return Err(Error::Configuration(
            "ec2.access_key_id and ec2.secret_access_key must be set".into(),
        ));
    }

    let transport = Arc::new(HttpsTransport::new(&config.endpoint, config.timeout())?);
    let client = Arc::new(Ec2Client::new(
        transport,
        &config.endpoint,
        &config.region,
        &config.access_key_id,
        &config.secret_access_key,
    )?);
    let image_params = image_filter_params(config);

    let others = OtherBackends::new();
    let network = Arc::new(Ec2Network::new(client.clone()));
    let storage = Arc::new(Ec2Storage::new(client.clone(), &config.region));
    others.register_network(network.clone())?;
    others.register_storage(storage.clone())?;

    let compute = Arc::new(Ec2Compute::new(
        client.clone(),
        others,
        store,
        &config.namespace,
        image_params.clone(),
    ));

    let proxy = BackendProxy::new()
        .with_compute(compute)
        .with_network(network)
        .with_storage(storage);

    let extender = Arc::new(Ec2Extender {
        client,
        namespace: config.namespace.clone(),
        image_params,
    });

    info!(endpoint = %config.endpoint, region = %config.region, "ec2 backend ready");
    Ok((proxy, extender))
}

/// Discovers AMIs and availability zones and registers them as os_tpl and
/// availability_zone mixin instances
struct Ec2Extender {
    client: Arc<Ec2Client>,
    namespace: String,
    image_params: Vec<(String, String)>,
}

#[async_trait]
impl ModelExtender for Ec2Extender {
    async fn extend_model(&self, model: &mut Model) -> Result<()> {
        for term in crate::occi::model::SKELETON_TERMS {
            model.skeleton(term)?;
        }

        let xml = self
            .client
            .call("DescribeImages", &self.image_params, Error::ResourceRetrieval)
            .await?;
        let images: DescribeImagesResponse = document::parse_document(&xml, "DescribeImages")?;
        for image in &images.images.items {
            let name = image.name.as_deref().unwrap_or(&image.image_id);
            model.extend_with("os_tpl", &self.namespace, name, &image.image_id)?;
        }

        let xml = self
            .client
            .call("DescribeAvailabilityZones", &[], Error::ResourceRetrieval)
            .await?;
        let zones: DescribeAvailabilityZonesResponse =
            document::parse_document(&xml, "DescribeAvailabilityZones")?;
        for zone in &zones.zones.items {
            model.extend_with(
                "availability_zone",
                &self.namespace,
                &zone.zone_name,
                &zone.zone_name,
            )?;
        }

        for instance_type in INSTANCE_TYPES {
            model.extend_with("resource_tpl", &self.namespace, instance_type, instance_type)?;
        }

        info!(
            images = images.images.items.len(),
            zones = zones.zones.items.len(),
            "model extended from platform catalogues"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryTransport for CannedTransport {
        async fn send(
            &self,
            _headers: Vec<(String, String)>,
            _body: String,
        ) -> Result<(u16, String)> {
            self.responses
                .lock()
                .pop()
                .map(|b| (200, b))
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn extender(responses: Vec<&str>, image_params: Vec<(String, String)>) -> Ec2Extender {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
        });
        let client = Ec2Client::new(
            transport,
            "https://ec2.eu-west-1.amazonaws.com",
            "eu-west-1",
            "AKIDEXAMPLE",
            "secret",
        )
        .unwrap();
        Ec2Extender {
            client: Arc::new(client),
            namespace: "http://occi.localhost/occi/infrastructure/ec2".into(),
            image_params,
        }
    }

    #[test]
    fn test_image_filter_params_per_policy() {
        let mut config = Ec2Config::default();
        config.image_filtering = ImageFilteringPolicy::All;
        assert!(image_filter_params(&config).is_empty());

        config.image_filtering = ImageFilteringPolicy::Owned;
        assert_eq!(
            image_filter_params(&config),
            vec![("Owner.1".to_string(), "self".to_string())]
        );

        config.image_filtering = ImageFilteringPolicy::Listed;
        config.image_list = vec!["ami-1".into(), "ami-2".into()];
        assert_eq!(
            image_filter_params(&config),
            vec![
                ("ImageId.1".to_string(), "ami-1".to_string()),
                ("ImageId.2".to_string(), "ami-2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_extender_registers_discovered_mixins() {
        let ext = extender(
            vec![
                "<DescribeImagesResponse><imagesSet><item>\
                 <imageId>ami-2f726546</imageId><name>Debian 12</name>\
                 </item></imagesSet></DescribeImagesResponse>",
                "<DescribeAvailabilityZonesResponse><availabilityZoneInfo><item>\
                 <zoneName>eu-west-1a</zoneName><zoneState>available</zoneState>\
                 </item></availabilityZoneInfo></DescribeAvailabilityZonesResponse>",
            ],
            vec![],
        );

        let mut model = Model::infrastructure();
        ext.extend_model(&mut model).await.unwrap();

        assert!(model
            .mixin("http://occi.localhost/occi/infrastructure/ec2/os_tpl#uuid_debian_12_ami-2f726546")
            .is_some());
        assert!(model
            .mixin(
                "http://occi.localhost/occi/infrastructure/ec2/availability_zone#uuid_eu_west_1a_eu-west-1a"
            )
            .is_some());
        assert!(model
            .mixin("http://occi.localhost/occi/infrastructure/ec2/resource_tpl#uuid_t2_micro_t2.micro")
            .is_some());
    }

    #[test]
    fn test_build_rejects_missing_credentials() {
        let config = Ec2Config::default();
        assert_matches!(
            build(&config, MemoryStore::shared()),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_build_wires_all_facades() {
        let config = Ec2Config {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            ..Ec2Config::default()
        };
        let (proxy, _) = build(&config, MemoryStore::shared()).unwrap();
        assert!(proxy.compute().is_ok());
        assert!(proxy.network().is_ok());
        assert!(proxy.storage().is_ok());
    }
}
