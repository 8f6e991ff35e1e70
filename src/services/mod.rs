//! Provisioners for the services that make up the topology.
//!
//! Each provisioner builds a [`ContainerSpec`](crate::orchestrator::ContainerSpec),
//! asks the orchestrator to start it, runs any post-start initialization and
//! hands back an immutable descriptor of the running service:
//!
//! - [`postgres`]: the contract helper's database; waits for readiness and
//!   creates the configured databases
//! - [`nearup`]: a local NEAR node
//! - [`contract_helper`]: the web service, configured from the other two
//!   descriptors

pub mod contract_helper;
pub mod nearup;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::orchestrator::{OrchestratorError, PortBinding, ServiceId, ServiceOrchestrator};
use crate::readiness::ReadinessError;

pub use contract_helper::{ContractHelperConfig, ContractHelperProvisioner, ContractHelperUpstream};
pub use nearup::{NearupConfig, NearupProvisioner};
pub use postgres::{PostgresConfig, PostgresProvisioner};

/// A provisioning-time command exited non-zero.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Command '{}' returned error exit code '{exit_code}' with logs:\n{output}", .command.join(" "))]
pub struct InitializationCommandError {
    pub command: Vec<String>,
    pub exit_code: i64,
    pub output: String,
}

/// Errors from [`ServiceProvisioner::provision`].
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The orchestrator could not create or start the service.
    #[error(transparent)]
    Orchestrator(OrchestratorError),

    /// The service never became available.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// The orchestrator could not run an initialization command.
    #[error(transparent)]
    InitializationExec(OrchestratorError),

    /// An initialization command ran and failed.
    #[error(transparent)]
    Initialization(#[from] InitializationCommandError),
}

/// Brings one service of the topology up.
#[async_trait]
pub trait ServiceProvisioner: Send + Sync {
    /// Descriptors of already-provisioned services this one is configured from.
    type Upstream: Send + Sync;
    /// What callers get back once the service is running.
    type Descriptor: Send;

    fn service_id(&self) -> ServiceId;

    async fn provision(
        &self,
        orchestrator: &dyn ServiceOrchestrator,
        upstream: &Self::Upstream,
    ) -> Result<Self::Descriptor, ProvisionError>;
}

/// Network location shared by every descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAddress {
    hostname: String,
    port: u16,
    host_port_binding: Option<PortBinding>,
}

impl ServiceAddress {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            host_port_binding: None,
        }
    }

    pub fn with_host_port_binding(mut self, binding: Option<PortBinding>) -> Self {
        self.host_port_binding = binding;
        self
    }

    /// Hostname on the topology network.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Port on the topology network.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host-machine binding; only set when ports are published.
    pub fn host_port_binding(&self) -> Option<&PortBinding> {
        self.host_port_binding.as_ref()
    }
}

/// The running database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostgresDescriptor {
    #[serde(flatten)]
    address: ServiceAddress,
    username: String,
    password: String,
    databases: Vec<String>,
    indexer_database: String,
}

impl PostgresDescriptor {
    pub fn new(
        address: ServiceAddress,
        username: impl Into<String>,
        password: impl Into<String>,
        databases: Vec<String>,
        indexer_database: impl Into<String>,
    ) -> Self {
        Self {
            address,
            username: username.into(),
            password: password.into(),
            databases,
            indexer_database: indexer_database.into(),
        }
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Databases created during initialization.
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    /// Database the indexer connection points at.
    pub fn indexer_database(&self) -> &str {
        &self.indexer_database
    }
}

/// The running NEAR node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearupDescriptor {
    /// Address of the RPC port.
    #[serde(flatten)]
    address: ServiceAddress,
}

impl NearupDescriptor {
    pub fn new(address: ServiceAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }
}

/// The running contract helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractHelperDescriptor {
    #[serde(flatten)]
    address: ServiceAddress,
}

impl ContractHelperDescriptor {
    pub fn new(address: ServiceAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_error_message() {
        let err = InitializationCommandError {
            command: vec![
                "psql".to_string(),
                "-U".to_string(),
                "near".to_string(),
                "-c".to_string(),
                "create database indexer with owner=near".to_string(),
            ],
            exit_code: 1,
            output: "ERROR:  database \"indexer\" already exists".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "Command 'psql -U near -c create database indexer with owner=near' returned error exit code '1' with logs:\nERROR:  database \"indexer\" already exists"
        );
    }

    #[test]
    fn test_descriptor_serializes_flat() {
        let descriptor = NearupDescriptor::new(
            ServiceAddress::new("nearup", 3030).with_host_port_binding(Some(PortBinding {
                host_ip: "127.0.0.1".to_string(),
                host_port: 49200,
            })),
        );

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["hostname"], "nearup");
        assert_eq!(json["port"], 3030);
        assert_eq!(json["host_port_binding"]["host_port"], 49200);
    }
}
