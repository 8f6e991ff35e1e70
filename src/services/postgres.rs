//! The contract helper's Postgres database.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::orchestrator::{ContainerSpec, PortSpec, ServiceId, ServiceOrchestrator};
use crate::readiness::{RetryPolicy, wait_until_ready};
use crate::services::{
    InitializationCommandError, PostgresDescriptor, ProvisionError, ServiceAddress,
    ServiceProvisioner,
};

pub const SERVICE_ID: &str = "contract-helper-db";
pub const PORT: PortSpec = PortSpec::tcp(5432);
pub const DEFAULT_IMAGE: &str = "postgres:13.4-alpine3.14";
pub const DEFAULT_USER: &str = "near";
pub const DEFAULT_PASSWORD: &str = "near";
pub const INDEXER_DB: &str = "indexer";

/// Settings for the database service.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub image: String,
    pub username: String,
    pub password: String,
    /// Databases created after the server accepts connections.
    pub databases: Vec<String>,
    /// Which of `databases` the indexer connection string points at.
    pub indexer_database: String,
    pub readiness: RetryPolicy,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            username: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            databases: vec![INDEXER_DB.to_string()],
            indexer_database: INDEXER_DB.to_string(),
            readiness: RetryPolicy::default(),
        }
    }
}

pub struct PostgresProvisioner {
    config: PostgresConfig,
}

impl PostgresProvisioner {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    pub fn container_spec(&self) -> ContainerSpec {
        let env = BTreeMap::from([
            ("POSTGRES_USER".to_string(), self.config.username.clone()),
            ("POSTGRES_PASSWORD".to_string(), self.config.password.clone()),
        ]);

        ContainerSpec::new(&self.config.image)
            .with_ports([PORT])
            .with_env(env)
    }

    /// `psql -U <user> -c \l`; exits 0 once the server accepts commands.
    pub fn availability_command(&self) -> Vec<String> {
        self.psql(r"\l".to_string())
    }

    pub fn create_database_command(&self, database: &str) -> Vec<String> {
        self.psql(format!(
            "create database {} with owner={}",
            database, self.config.username
        ))
    }

    fn psql(&self, sql: String) -> Vec<String> {
        vec![
            "psql".to_string(),
            "-U".to_string(),
            self.config.username.clone(),
            "-c".to_string(),
            sql,
        ]
    }
}

#[async_trait]
impl ServiceProvisioner for PostgresProvisioner {
    type Upstream = ();
    type Descriptor = PostgresDescriptor;

    fn service_id(&self) -> ServiceId {
        ServiceId::from(SERVICE_ID)
    }

    async fn provision(
        &self,
        orchestrator: &dyn ServiceOrchestrator,
        _upstream: &(),
    ) -> Result<PostgresDescriptor, ProvisionError> {
        let service_id = self.service_id();
        tracing::info!(service = %service_id, port = %PORT, "Adding contract helper DB");

        let added = orchestrator
            .add_service(&service_id, self.container_spec().into())
            .await
            .map_err(ProvisionError::Orchestrator)?;
        let handle = &added.handle;

        let probe = self.availability_command();
        let probe = probe.as_slice();
        wait_until_ready(SERVICE_ID, &self.config.readiness, || {
            orchestrator.exec_command(handle, probe)
        })
        .await?;

        let shared = orchestrator.shared_directory(handle);
        tracing::debug!(
            service = %service_id,
            shared_dir = %shared.host_path.display(),
            "Contract helper DB is available"
        );

        // Databases are created unconditionally; a leftover database from an
        // earlier run makes this fail.
        for database in &self.config.databases {
            let command = self.create_database_command(database);
            let output = orchestrator
                .exec_command(handle, &command)
                .await
                .map_err(ProvisionError::InitializationExec)?;

            if !output.is_success() {
                return Err(InitializationCommandError {
                    command,
                    exit_code: output.exit_code,
                    output: output.output,
                }
                .into());
            }
            tracing::info!(service = %service_id, database = %database, "Created database");
        }

        let address = ServiceAddress::new(service_id.as_str(), PORT.number)
            .with_host_port_binding(added.host_binding(&PORT));

        Ok(PostgresDescriptor::new(
            address,
            &self.config.username,
            &self.config.password,
            self.config.databases.clone(),
            &self.config.indexer_database,
        ))
    }
}
