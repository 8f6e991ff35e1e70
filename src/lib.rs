//! Stands up a NEAR contract-helper test topology on Docker.
//!
//! A Postgres database, a local `nearup` node and the contract helper web
//! service are provisioned in order through a [`ServiceOrchestrator`]
//! (see [`topology::assemble_topology`]).
//!
//! [`ServiceOrchestrator`]: orchestrator::ServiceOrchestrator

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod readiness;
pub mod services;
pub mod testing;
pub mod topology;
