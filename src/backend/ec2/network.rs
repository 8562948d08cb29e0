//! EC2 network facade
//!
//! VPCs map onto OCCI network resources, read-only. VPC lifecycle is an
//! administrative concern on EC2 and is deliberately not driven from here;
//! every mutating operation reports itself unimplemented.

use super::client::Ec2Client;
use super::document::{self, DescribeVpcsResponse, VpcItem};
use crate::backend::pool::PoolCache;
use crate::backend::{require_id, Capabilities, NetworkBackend, ResourceBackend};
use crate::error::{Error, Result};
use crate::occi::{ActionInstance, Attributes, Resource};
use async_trait::async_trait;
use std::sync::Arc;

pub struct Ec2Network {
    client: Arc<Ec2Client>,
    vpcs: PoolCache<DescribeVpcsResponse>,
}

impl Ec2Network {
    pub fn new(client: Arc<Ec2Client>) -> Self {
        Self {
            client,
            vpcs: PoolCache::new(),
        }
    }

    async fn pool(&self) -> Result<Arc<DescribeVpcsResponse>> {
        self.vpcs
            .pool("vpc", "all", false, || async {
                let xml = self
                    .client
                    .call("DescribeVpcs", &[], Error::ResourceRetrieval)
                    .await?;
                document::parse_document(&xml, "DescribeVpcs")
            })
            .await
    }

    fn to_resource(vpc: &VpcItem) -> Resource {
        let mut resource = Resource::network(vpc.vpc_id.clone()).with_title(vpc.vpc_id.clone());
        resource.set_network_state(document::network_state(&vpc.state));
        resource.set_attribute("occi.network.allocation", "dynamic");
        if let Some(cidr) = &vpc.cidr_block {
            resource.set_attribute("occi.network.address", cidr.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceBackend for Ec2Network {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            create: false,
            update: false,
            partial_update: false,
            delete: false,
            actions: false,
            links: false,
            backend: "ec2",
        }
    }

    async fn list(&self, filter: &[String]) -> Result<Vec<Resource>> {
        let pool = self.pool().await?;
        Ok(pool
            .vpcs
            .items
            .iter()
            .map(Self::to_resource)
            .filter(|r| filter.iter().all(|m| r.mixins.contains(m)))
            .collect())
    }

    async fn list_ids(&self, filter: &[String]) -> Result<Vec<String>> {
        Ok(self.list(filter).await?.into_iter().map(|r| r.id).collect())
    }

    async fn get(&self, id: &str) -> Result<Resource> {
        require_id("id", id)?;
        let xml = self
            .client
            .call(
                "DescribeVpcs",
                &[("VpcId.1".to_string(), id.to_string())],
                Error::ResourceRetrieval,
            )
            .await?;
        let doc: DescribeVpcsResponse = document::parse_document(&xml, "DescribeVpcs")?;
        doc.vpcs
            .items
            .first()
            .map(Self::to_resource)
            .ok_or_else(|| Error::not_found("network", id))
    }

    async fn create(&self, _resource: Resource) -> Result<String> {
        Err(Error::MethodNotImplemented {
            backend: "ec2".into(),
            operation: "create".into(),
        })
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

    async fn delete(&self, _id: &str) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure("delete", caps.delete)
    }

    async fn delete_all(&self, _filter: &[String]) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure("delete", caps.delete)
    }

    async fn trigger_action(&self, _id: &str, action: &ActionInstance) -> Result<()> {
        let caps = self.capabilities();
        caps.ensure(&format!("action {}", action.term()), caps.actions)
    }
}

impl NetworkBackend for Ec2Network {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ec2::client::QueryTransport;
    use crate::occi::{NetworkState, ResourceState};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<(u16, String)>>,
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
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn facade(responses: Vec<&str>) -> Ec2Network {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(
                responses.into_iter().rev().map(|b| (200, b.to_string())).collect(),
            ),
        });
        let client = Arc::new(
            Ec2Client::new(
                transport,
                "https://ec2.eu-west-1.amazonaws.com",
                "eu-west-1",
                "AKIDEXAMPLE",
                "secret",
            )
            .unwrap(),
        );
        Ec2Network::new(client)
    }

    const VPCS_XML: &str = "<DescribeVpcsResponse><vpcSet><item>\
                            <vpcId>vpc-1a2b3c4d</vpcId><state>available</state>\
                            <cidrBlock>10.0.0.0/16</cidrBlock>\
                            </item></vpcSet></DescribeVpcsResponse>";

    #[tokio::test]
    async fn test_list_translates_vpcs() {
        let network = facade(vec![VPCS_XML]);
        let resources = network.list(&[]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "vpc-1a2b3c4d");
        assert_eq!(
            resources[0].state,
            Some(ResourceState::Network(NetworkState::Active))
        );
        assert_eq!(
            resources[0].attributes.get_str("occi.network.address"),
            Some("10.0.0.0/16")
        );
    }

    #[tokio::test]
    async fn test_get_missing_vpc_is_not_found() {
        let network = facade(vec!["<DescribeVpcsResponse><vpcSet/></DescribeVpcsResponse>"]);
        assert_matches!(
            network.get("vpc-ffffffff").await,
            Err(Error::ResourceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_mutations_are_not_implemented() {
        let network = facade(vec![]);
        assert_matches!(
            network.create(Resource::network("n")).await,
            Err(Error::MethodNotImplemented { .. })
        );
        assert_matches!(
            network.delete("vpc-1a2b3c4d").await,
            Err(Error::MethodNotImplemented { .. })
        );
    }
}
