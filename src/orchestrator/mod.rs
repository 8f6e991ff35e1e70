//! Boundary to the engine that creates containers and runs commands in them.
//!
//! Provisioners only ever talk to a [`ServiceOrchestrator`]. The Docker-backed
//! implementation lives in [`docker`]; tests use
//! [`StubOrchestrator`](crate::testing::StubOrchestrator).
//!
//! # Flow
//!
//! ```text
//! ┌─────────────┐  add_service(id, spec)   ┌──────────────────────────────┐
//! │ Provisioner │─────────────────────────▶│ ServiceOrchestrator          │
//! │             │                          │  1. assign network address   │
//! │             │                          │  2. resolve spec (supplier)  │
//! │             │                          │  3. create + start container │
//! │             │◀─────────────────────────│  4. report host port binds   │
//! │             │  AddedService            └──────────────────────────────┘
//! │             │  exec_command(handle, argv) ──▶ ExecOutput { exit, output }
//! └─────────────┘
//! ```

pub mod docker;
pub mod error;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use docker::DockerOrchestrator;
pub use error::{OrchestratorError, Result};

/// Exit code that marks a command run inside a container as successful.
pub const EXEC_SUCCESS_EXIT_CODE: i64 = 0;

/// Identifier of a service inside the topology. Doubles as its hostname on
/// the topology network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// A protocol-qualified container port, written `"<port>/<protocol>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortSpec {
    pub number: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub const fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol.as_str())
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (number, protocol) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid port descriptor '{s}', expected '<port>/<protocol>'"))?;
        let number = number
            .parse()
            .map_err(|e| format!("invalid port number in '{s}': {e}"))?;
        let protocol = match protocol.to_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            other => return Err(format!("unknown protocol '{other}' in '{s}'")),
        };
        Ok(Self { number, protocol })
    }
}

/// Where a container port is published on the host machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_ip, self.host_port)
    }
}

/// Declarative description of a container to run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub ports: BTreeSet<PortSpec>,
    pub env: BTreeMap<String, String>,
    /// Overrides the image's default command.
    pub cmd: Option<Vec<String>>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = PortSpec>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }
}

/// Function from a service's assigned network address to its container spec.
pub type ContainerSpecSupplier = Arc<dyn Fn(IpAddr) -> ContainerSpec + Send + Sync>;

/// How a provisioner hands its container spec to the orchestrator.
#[derive(Clone)]
pub enum ContainerSpecSource {
    /// Spec known up front.
    Static(ContainerSpec),
    /// Spec computed once the orchestrator has assigned the service an address.
    Supplier(ContainerSpecSupplier),
}

impl ContainerSpecSource {
    pub fn supplier<F>(f: F) -> Self
    where
        F: Fn(IpAddr) -> ContainerSpec + Send + Sync + 'static,
    {
        Self::Supplier(Arc::new(f))
    }

    /// Produce the concrete spec for a service assigned `address`.
    pub fn resolve(&self, address: IpAddr) -> ContainerSpec {
        match self {
            Self::Static(spec) => spec.clone(),
            Self::Supplier(supplier) => supplier(address),
        }
    }
}

impl fmt::Debug for ContainerSpecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(spec) => f.debug_tuple("Static").field(spec).finish(),
            Self::Supplier(_) => f.write_str("Supplier(..)"),
        }
    }
}

impl From<ContainerSpec> for ContainerSpecSource {
    fn from(spec: ContainerSpec) -> Self {
        Self::Static(spec)
    }
}

/// Reference to a running service, used for follow-up commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub service_id: ServiceId,
    pub container_id: String,
    pub ip_address: IpAddr,
}

/// What the orchestrator reports back after starting a service.
#[derive(Debug, Clone)]
pub struct AddedService {
    pub handle: ServiceHandle,
    /// Only populated for ports published on the host (debug mode).
    pub host_port_bindings: HashMap<PortSpec, PortBinding>,
}

impl AddedService {
    pub fn host_binding(&self, port: &PortSpec) -> Option<PortBinding> {
        self.host_port_bindings.get(port).cloned()
    }
}

/// Result of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == EXEC_SUCCESS_EXIT_CODE
    }
}

/// A directory shared between the host and a service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPath {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
}

impl SharedPath {
    /// Path to `relative` under this directory, on both sides of the mount.
    pub fn child(&self, relative: impl AsRef<Path>) -> SharedPath {
        SharedPath {
            host_path: self.host_path.join(relative.as_ref()),
            container_path: self.container_path.join(relative.as_ref()),
        }
    }
}

/// Engine that creates containers, assigns them addresses and runs commands
/// inside them.
///
/// Implementations must tolerate independent requests arriving one after
/// another over the same connection.
#[async_trait]
pub trait ServiceOrchestrator: Send + Sync {
    /// Create and start a service.
    async fn add_service(
        &self,
        service_id: &ServiceId,
        spec: ContainerSpecSource,
    ) -> Result<AddedService>;

    /// Run `argv` inside the service's container and wait for it to exit.
    async fn exec_command(&self, handle: &ServiceHandle, argv: &[String]) -> Result<ExecOutput>;

    /// Directory shared between the host and the service's container.
    fn shared_directory(&self, handle: &ServiceHandle) -> SharedPath;
}
