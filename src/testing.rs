//! In-memory orchestrator for exercising provisioners without Docker.
//!
//! Provides:
//! - [`StubOrchestrator`]: records every call, resolves container specs
//!   against fake addresses and answers commands from a scripted handler
//! - [`StubExec`]: what a scripted command returns
//!
//! # Usage
//!
//! ```rust,no_run
//! use near_topology::testing::{StubExec, StubOrchestrator};
//!
//! let orchestrator = StubOrchestrator::new()
//!     .with_exec_handler(|argv| {
//!         if argv.iter().any(|a| a.starts_with("create database")) {
//!             StubExec::exit(1, "already exists")
//!         } else {
//!             StubExec::ok()
//!         }
//!     });
//! ```

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::orchestrator::{
    AddedService, ContainerSpec, ContainerSpecSource, ExecOutput, OrchestratorError, PortBinding,
    Result, ServiceHandle, ServiceId, ServiceOrchestrator, SharedPath,
};

/// Scripted outcome of one `exec_command` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubExec {
    /// The command ran and exited with this code and output.
    Exit { code: i64, output: String },
    /// The orchestrator failed to run the command at all.
    Error(String),
}

impl StubExec {
    pub fn ok() -> Self {
        Self::exit(0, "")
    }

    pub fn exit(code: i64, output: impl Into<String>) -> Self {
        Self::Exit {
            code,
            output: output.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error(reason.into())
    }
}

/// Addresses are handed out from 10.0.0.0/8, starting at 10.0.0.2.
const STUB_SUBNET: &str = "10.0.0.0/8";
const STUB_FIRST_HOST: u32 = 0x0A00_0002;
const STUB_HOST_COUNT: u32 = (1 << 24) - 3;

const STUB_PORT_BASE: u32 = 40000;
const STUB_PORT_RANGE: u32 = 25000;

fn stub_host_port(service_index: u32, port_index: usize) -> u16 {
    let port_index = u32::try_from(port_index).unwrap_or(0);
    let offset = (service_index.wrapping_mul(100).wrapping_add(port_index)) % STUB_PORT_RANGE;
    // STUB_PORT_BASE + offset stays below 65000
    u16::try_from(STUB_PORT_BASE + offset).unwrap_or(u16::MAX)
}

type ExecHandler = Box<dyn Fn(&[String]) -> StubExec + Send + Sync>;

/// A recorded `exec_command` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub service_id: ServiceId,
    pub argv: Vec<String>,
}

/// Orchestrator double that never touches Docker.
pub struct StubOrchestrator {
    exec_handler: ExecHandler,
    failing_services: HashSet<ServiceId>,
    publish_ports: bool,
    added: Mutex<Vec<(ServiceId, ContainerSpec)>>,
    exec_calls: Mutex<Vec<ExecCall>>,
}

impl StubOrchestrator {
    /// Every service starts and every command exits 0.
    pub fn new() -> Self {
        Self {
            exec_handler: Box::new(|_| StubExec::ok()),
            failing_services: HashSet::new(),
            publish_ports: false,
            added: Mutex::new(Vec::new()),
            exec_calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `exec_command` calls with `handler`.
    pub fn with_exec_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[String]) -> StubExec + Send + Sync + 'static,
    {
        self.exec_handler = Box::new(handler);
        self
    }

    /// Make `add_service` fail for `service_id`.
    pub fn with_failing_service(mut self, service_id: &str) -> Self {
        self.failing_services.insert(ServiceId::from(service_id));
        self
    }

    /// Report a host port binding for every exposed port, as in debug mode.
    pub fn publishing_ports(mut self) -> Self {
        self.publish_ports = true;
        self
    }

    /// Services successfully added, in order.
    pub fn added_services(&self) -> Vec<ServiceId> {
        self.lock_added().iter().map(|(id, _)| id.clone()).collect()
    }

    /// The resolved spec a service was started with.
    pub fn spec_for(&self, service_id: &str) -> Option<ContainerSpec> {
        self.lock_added()
            .iter()
            .find(|(id, _)| id.as_str() == service_id)
            .map(|(_, spec)| spec.clone())
    }

    /// Every `exec_command` call, in order.
    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.exec_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_added(&self) -> std::sync::MutexGuard<'_, Vec<(ServiceId, ContainerSpec)>> {
        self.added.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StubOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceOrchestrator for StubOrchestrator {
    async fn add_service(
        &self,
        service_id: &ServiceId,
        spec: ContainerSpecSource,
    ) -> Result<AddedService> {
        if self.failing_services.contains(service_id) {
            return Err(OrchestratorError::ContainerCreationFailed {
                service: service_id.to_string(),
                reason: "stub configured to fail".to_string(),
            });
        }

        let mut added = self.lock_added();
        if added.iter().any(|(id, _)| id == service_id) {
            return Err(OrchestratorError::ServiceExists {
                service: service_id.to_string(),
            });
        }

        let index = u32::try_from(added.len())
            .ok()
            .filter(|index| *index < STUB_HOST_COUNT)
            .ok_or_else(|| OrchestratorError::AddressSpaceExhausted {
                subnet: STUB_SUBNET.to_string(),
            })?;
        let ip = IpAddr::V4(Ipv4Addr::from(STUB_FIRST_HOST + index));
        let spec = spec.resolve(ip);

        let host_port_bindings: HashMap<_, _> = if self.publish_ports {
            spec.ports
                .iter()
                .enumerate()
                .map(|(i, port)| {
                    (
                        *port,
                        PortBinding {
                            host_ip: "127.0.0.1".to_string(),
                            host_port: stub_host_port(index, i),
                        },
                    )
                })
                .collect()
        } else {
            HashMap::new()
        };

        added.push((service_id.clone(), spec));

        Ok(AddedService {
            handle: ServiceHandle {
                service_id: service_id.clone(),
                container_id: format!("stub-{}", service_id),
                ip_address: ip,
            },
            host_port_bindings,
        })
    }

    async fn exec_command(&self, handle: &ServiceHandle, argv: &[String]) -> Result<ExecOutput> {
        self.exec_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExecCall {
                service_id: handle.service_id.clone(),
                argv: argv.to_vec(),
            });

        match (self.exec_handler)(argv) {
            StubExec::Exit { code, output } => Ok(ExecOutput {
                exit_code: code,
                output,
            }),
            StubExec::Error(reason) => Err(OrchestratorError::ExecFailed {
                service: handle.service_id.to_string(),
                command: argv.to_vec(),
                reason,
            }),
        }
    }

    fn shared_directory(&self, handle: &ServiceHandle) -> SharedPath {
        SharedPath {
            host_path: std::env::temp_dir()
                .join("near-topology-stub")
                .join(handle.service_id.as_str()),
            container_path: PathBuf::from("/shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::orchestrator::{ContainerSpec, PortSpec};

    #[tokio::test]
    async fn test_addresses_stay_distinct_past_one_octet() {
        let orchestrator = StubOrchestrator::new().publishing_ports();
        let mut addresses = HashSet::new();

        for n in 0..300 {
            let id = ServiceId::new(format!("svc-{n}"));
            let spec = ContainerSpec::new("img").with_ports([PortSpec::tcp(80)]);
            let added = orchestrator.add_service(&id, spec.into()).await.unwrap();
            assert!(added.host_binding(&PortSpec::tcp(80)).is_some());
            addresses.insert(added.handle.ip_address);
        }

        assert_eq!(addresses.len(), 300);
        assert!(addresses.contains(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert!(addresses.contains(&IpAddr::V4(Ipv4Addr::new(10, 0, 1, 45))));
    }
}
