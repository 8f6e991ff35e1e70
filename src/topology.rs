//! Ordered assembly of the whole topology.
//!
//! ```text
//!   Postgres ──▶ wait (psql \l) ──▶ CREATE DATABASE ──┐
//!                                                      ├──▶ contract helper
//!   nearup ───────────────────────────────────────────┘
//! ```
//!
//! Steps run one after another and the first failure ends the sequence.
//! Services that were already started are left running; cleaning them up is
//! up to the caller (see `near-topology down`).

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::TopologySecrets;
use crate::orchestrator::ServiceOrchestrator;
use crate::services::{
    ContractHelperConfig, ContractHelperDescriptor, ContractHelperProvisioner,
    ContractHelperUpstream, NearupConfig, NearupDescriptor, NearupProvisioner, PostgresConfig,
    PostgresDescriptor, PostgresProvisioner, ProvisionError, ServiceProvisioner,
};

/// Step of the assembly sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ProvisionDatabase,
    WaitForDatabase,
    InitializeDatabase,
    ProvisionNode,
    ProvisionContractHelper,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProvisionDatabase => "provision database",
            Stage::WaitForDatabase => "wait for database",
            Stage::InitializeDatabase => "initialize database",
            Stage::ProvisionNode => "provision node",
            Stage::ProvisionContractHelper => "provision contract helper",
        }
    }

    /// Which database step a provisioning error came from.
    fn of_database_error(err: &ProvisionError) -> Self {
        match err {
            ProvisionError::Orchestrator(_) => Stage::ProvisionDatabase,
            ProvisionError::Readiness(_) => Stage::WaitForDatabase,
            ProvisionError::InitializationExec(_) | ProvisionError::Initialization(_) => {
                Stage::InitializeDatabase
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The assembly failed at `stage`.
#[derive(Debug, Error)]
#[error("Failed to {stage}: {source}")]
pub struct TopologyError {
    pub stage: Stage,
    #[source]
    pub source: ProvisionError,
}

impl TopologyError {
    fn at(stage: Stage) -> impl FnOnce(ProvisionError) -> Self {
        move |source| Self { stage, source }
    }
}

/// Per-service settings for one assembly.
#[derive(Debug, Clone, Default)]
pub struct TopologyPlan {
    pub postgres: PostgresConfig,
    pub nearup: NearupConfig,
    pub contract_helper: ContractHelperConfig,
}

/// Everything that is running once assembly succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyDescriptors {
    pub database: PostgresDescriptor,
    pub node: NearupDescriptor,
    pub contract_helper: ContractHelperDescriptor,
}

/// Provision database, node and contract helper, in that order.
pub async fn assemble_topology(
    orchestrator: &dyn ServiceOrchestrator,
    plan: &TopologyPlan,
    secrets: &TopologySecrets,
) -> Result<TopologyDescriptors, TopologyError> {
    let database = PostgresProvisioner::new(plan.postgres.clone())
        .provision(orchestrator, &())
        .await
        .map_err(|source| TopologyError {
            stage: Stage::of_database_error(&source),
            source,
        })?;
    tracing::info!(
        hostname = database.address().hostname(),
        databases = ?database.databases(),
        "Database ready"
    );

    let node = NearupProvisioner::new(plan.nearup.clone())
        .provision(orchestrator, &())
        .await
        .map_err(TopologyError::at(Stage::ProvisionNode))?;
    tracing::info!(hostname = node.address().hostname(), "Node started");

    let upstream = ContractHelperUpstream { database, node };
    let contract_helper = ContractHelperProvisioner::new(
        plan.contract_helper.clone(),
        secrets.account_creator_key.clone(),
    )
    .provision(orchestrator, &upstream)
    .await
    .map_err(TopologyError::at(Stage::ProvisionContractHelper))?;
    tracing::info!(
        hostname = contract_helper.address().hostname(),
        "Contract helper started"
    );

    let ContractHelperUpstream { database, node } = upstream;
    Ok(TopologyDescriptors {
        database,
        node,
        contract_helper,
    })
}
