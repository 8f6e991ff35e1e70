//! Local NEAR node started through `nearup`.

use async_trait::async_trait;

use crate::orchestrator::{ContainerSpec, PortSpec, ServiceId, ServiceOrchestrator};
use crate::services::{NearupDescriptor, ProvisionError, ServiceAddress, ServiceProvisioner};

pub const SERVICE_ID: &str = "nearup";
pub const RPC_PORT: PortSpec = PortSpec::tcp(3030);
pub const NETWORK_PORT: PortSpec = PortSpec::tcp(24567);
pub const DEFAULT_IMAGE: &str = "nearprotocol/nearup:latest";

/// Settings for the node service.
#[derive(Debug, Clone)]
pub struct NearupConfig {
    pub image: String,
    /// Arguments passed to the image's `nearup` entrypoint.
    pub args: Vec<String>,
}

impl Default for NearupConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            args: vec!["run".to_string(), "localnet".to_string()],
        }
    }
}

pub struct NearupProvisioner {
    config: NearupConfig,
}

impl NearupProvisioner {
    pub fn new(config: NearupConfig) -> Self {
        Self { config }
    }

    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec::new(&self.config.image)
            .with_ports([RPC_PORT, NETWORK_PORT])
            .with_cmd(self.config.args.clone())
    }
}

#[async_trait]
impl ServiceProvisioner for NearupProvisioner {
    type Upstream = ();
    type Descriptor = NearupDescriptor;

    fn service_id(&self) -> ServiceId {
        ServiceId::from(SERVICE_ID)
    }

    async fn provision(
        &self,
        orchestrator: &dyn ServiceOrchestrator,
        _upstream: &(),
    ) -> Result<NearupDescriptor, ProvisionError> {
        let service_id = self.service_id();
        tracing::info!(service = %service_id, port = %RPC_PORT, "Adding nearup node");

        let added = orchestrator
            .add_service(&service_id, self.container_spec().into())
            .await
            .map_err(ProvisionError::Orchestrator)?;

        let address = ServiceAddress::new(service_id.as_str(), RPC_PORT.number)
            .with_host_port_binding(added.host_binding(&RPC_PORT));

        Ok(NearupDescriptor::new(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_spec() {
        let spec = NearupProvisioner::new(NearupConfig::default()).container_spec();

        assert_eq!(spec.image, DEFAULT_IMAGE);
        assert_eq!(spec.ports.len(), 2);
        assert!(spec.ports.contains(&RPC_PORT));
        assert!(spec.ports.contains(&NETWORK_PORT));
        assert_eq!(
            spec.cmd,
            Some(vec!["run".to_string(), "localnet".to_string()])
        );
    }
}
