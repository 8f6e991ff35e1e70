//! CLI command handling.
//!
//! Provides subcommands for:
//! - Bringing the topology up (`up`)
//! - Removing everything a previous `up` left running (`down`)
//! - Printing the contract helper's environment (`env`)

use std::collections::BTreeMap;

use clap::{ColorChoice, Parser, Subcommand};
use secrecy::SecretString;

use crate::services::contract_helper::ACCOUNT_CREATOR_KEY_ENVVAR;
use crate::services::{
    ContractHelperProvisioner, ContractHelperUpstream, NearupDescriptor, PostgresDescriptor,
    ServiceAddress, nearup, postgres,
};
use crate::topology::TopologyPlan;

const REDACTED: &str = "<redacted>";

#[derive(Parser, Debug)]
#[command(name = "near-topology")]
#[command(about = "Stand up a NEAR contract-helper test topology on Docker")]
#[command(
    long_about = "Starts Postgres, a local nearup node and the contract helper on one Docker network.\nExamples:\n  near-topology up --debug  # Publish service ports on the host\n  near-topology down  # Remove the topology"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision database, node and contract helper
    #[command(
        about = "Bring the topology up",
        long_about = "Provisions the database, waits for it, creates its databases, then starts nearup and the contract helper.\nPrints the service descriptors as JSON.\nExample: near-topology up --debug"
    )]
    Up {
        /// Publish every service port on an ephemeral host port
        #[arg(long)]
        debug: bool,

        /// Docker network to create the services on
        #[arg(long)]
        network: Option<String>,
    },

    /// Remove the topology's containers and network
    #[command(
        about = "Tear the topology down",
        long_about = "Removes every container labelled with the network, then the network itself.\nExample: near-topology down --network near-topology"
    )]
    Down {
        /// Docker network to tear down
        #[arg(long)]
        network: Option<String>,
    },

    /// Print the contract helper environment for the configured plan
    Env,
}

/// Environment the contract helper would get, with the account creator key
/// replaced by a placeholder.
pub fn contract_helper_env_preview(plan: &TopologyPlan) -> BTreeMap<String, String> {
    let database = PostgresDescriptor::new(
        ServiceAddress::new(postgres::SERVICE_ID, postgres::PORT.number),
        &plan.postgres.username,
        &plan.postgres.password,
        plan.postgres.databases.clone(),
        &plan.postgres.indexer_database,
    );
    let node = NearupDescriptor::new(ServiceAddress::new(
        nearup::SERVICE_ID,
        nearup::RPC_PORT.number,
    ));

    let provisioner = ContractHelperProvisioner::new(
        plan.contract_helper.clone(),
        SecretString::from(REDACTED.to_string()),
    );
    let mut env = provisioner.environment(&ContractHelperUpstream { database, node });
    env.insert(ACCOUNT_CREATOR_KEY_ENVVAR.to_string(), REDACTED.to_string());
    env
}
