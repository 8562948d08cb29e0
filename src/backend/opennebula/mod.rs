//! OpenNebula backend
//!
//! Facades over the oned XML-RPC API. Every call funnels through
//! [`client::OneClient`], which owns the vendor error translation; the
//! facades above it deal only in taxonomy errors and OCCI resources.

mod client;
mod compute;
mod document;
mod network;
mod storage;

pub use client::{HttpTransport, OneClient, RpcParam, RpcTransport};
pub use compute::OneCompute;
pub use network::OneNetwork;
pub use storage::OneStorage;

use crate::backend::{
    BackendProxy, ModelExtender, ModelExtenderRef, OtherBackends,
};
use crate::config::OpennebulaConfig;
use crate::error::{Error, Result};
use crate::occi::Model;
use crate::template::TemplateStore;
use async_trait::async_trait;
use document::{ClusterPool, TemplatePool};
use std::sync::Arc;
use tracing::info;

const POOL_MINE: i64 = -3;
const POOL_RANGE_ALL: i64 = -1;

/// Fixed resource_tpl sizes advertised by this backend; oned has no
/// first-class flavor object to discover them from
const RESOURCE_TEMPLATES: &[(&str, &str)] = &[
    ("small", "1"),
    ("medium", "2"),
    ("large", "3"),
];

/// Build the OpenNebula facade family and its model extender
pub fn build(config: &OpennebulaConfig) -> Result<(BackendProxy, ModelExtenderRef)> {
    if config.credentials.is_empty() {
        return Err(Error::Configuration(
            "opennebula.credentials must be set".into(),
        ));
    }

    let transport = Arc::new(HttpTransport::new(&config.endpoint, config.timeout())?);
    let client = Arc::new(OneClient::new(transport, &config.credentials));
    let templates = Arc::new(TemplateStore::new(&config.templates_dir));

    let others = OtherBackends::new();
    let network = Arc::new(OneNetwork::new(client.clone(), templates.clone()));
    let storage = Arc::new(OneStorage::new(client.clone(), templates.clone()));
    others.register_network(network.clone())?;
    others.register_storage(storage.clone())?;

    let compute = Arc::new(OneCompute::new(
        client.clone(),
        others,
        templates,
        &config.namespace,
    ));

    let proxy = BackendProxy::new()
        .with_compute(compute)
        .with_network(network)
        .with_storage(storage);

    let extender = Arc::new(OneExtender {
        client,
        namespace: config.namespace.clone(),
    });

    info!(endpoint = %config.endpoint, "opennebula backend ready");
    Ok((proxy, extender))
}

/// Discovers platform templates and clusters and registers them as os_tpl
/// and availability_zone mixin instances
struct OneExtender {
    client: Arc<OneClient>,
    namespace: String,
}

#[async_trait]
impl ModelExtender for OneExtender {
    async fn extend_model(&self, model: &mut Model) -> Result<()> {
        for term in crate::occi::model::SKELETON_TERMS {
            model.skeleton(term)?;
        }

        let xml = self
            .client
            .call(
                "one.templatepool.info",
                &[POOL_MINE.into(), POOL_RANGE_ALL.into(), POOL_RANGE_ALL.into()],
                Error::ResourceRetrieval,
            )
            .await?;
        let templates: TemplatePool = document::parse_document(&xml, "template pool")?;
        for template in &templates.templates {
            model.extend_with(
                "os_tpl",
                &self.namespace,
                &template.name,
                &template.id.to_string(),
            )?;
        }

        let xml = self
            .client
            .call("one.clusterpool.info", &[], Error::ResourceRetrieval)
            .await?;
        let clusters: ClusterPool = document::parse_document(&xml, "cluster pool")?;
        for cluster in &clusters.clusters {
            model.extend_with(
                "availability_zone",
                &self.namespace,
                &cluster.name,
                &cluster.id.to_string(),
            )?;
        }

        for (name, id) in RESOURCE_TEMPLATES {
            model.extend_with("resource_tpl", &self.namespace, name, id)?;
        }

        info!(
            templates = templates.templates.len(),
            clusters = clusters.clusters.len(),
            "model extended from platform pools"
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
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcTransport for CannedTransport {
        async fn post(&self, _body: String) -> Result<String> {
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

    fn extender(responses: Vec<String>) -> OneExtender {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(responses.into_iter().rev().collect()),
        });
        OneExtender {
            client: Arc::new(OneClient::new(transport, "alice:token")),
            namespace: "http://occi.localhost/occi/infrastructure/opennebula".into(),
        }
    }

    #[tokio::test]
    async fn test_extender_registers_discovered_mixins() {
        let ext = extender(vec![
            ok_response(
                "<VMTEMPLATE_POOL><VMTEMPLATE><ID>7</ID><NAME>Debian 12</NAME></VMTEMPLATE></VMTEMPLATE_POOL>",
            ),
            ok_response(
                "<CLUSTER_POOL><CLUSTER><ID>100</ID><NAME>ams-1</NAME></CLUSTER></CLUSTER_POOL>",
            ),
        ]);

        let mut model = Model::infrastructure();
        ext.extend_model(&mut model).await.unwrap();

        assert!(model
            .mixin("http://occi.localhost/occi/infrastructure/opennebula/os_tpl#uuid_debian_12_7")
            .is_some());
        assert!(model
            .mixin(
                "http://occi.localhost/occi/infrastructure/opennebula/availability_zone#uuid_ams_1_100"
            )
            .is_some());
        assert!(model
            .mixin("http://occi.localhost/occi/infrastructure/opennebula/resource_tpl#uuid_small_1")
            .is_some());
    }

    #[tokio::test]
    async fn test_extender_requires_skeletons() {
        let ext = extender(vec![]);
        let mut model = Model::new();
        assert_matches!(ext.extend_model(&mut model).await, Err(Error::Internal(_)));
    }

    #[test]
    fn test_build_rejects_empty_credentials() {
        let config = OpennebulaConfig::default();
        assert_matches!(build(&config), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_build_wires_all_facades() {
        let config = OpennebulaConfig {
            credentials: "alice:token".into(),
            ..OpennebulaConfig::default()
        };
        let (proxy, _) = build(&config).unwrap();
        assert!(proxy.compute().is_ok());
        assert!(proxy.network().is_ok());
        assert!(proxy.storage().is_ok());
    }
}
