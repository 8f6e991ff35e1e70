//! [`ServiceOrchestrator`] backed by the local Docker daemon.
//!
//! Every service joins one labelled bridge network. Addresses are handed out
//! by the orchestrator itself from the configured subnet, which is what lets
//! a [`ContainerSpecSource::Supplier`] see its own IP before the container
//! exists.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, ExecInspectResponse, HostConfig, Ipam, IpamConfig,
    PortBinding as DockerPortBinding,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use futures::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::orchestrator::error::{OrchestratorError, Result};
use crate::orchestrator::{
    AddedService, ContainerSpec, ContainerSpecSource, ExecOutput, PortBinding, PortSpec,
    ServiceHandle, ServiceId, ServiceOrchestrator, SharedPath,
};

/// Label carrying the topology network name; `down` removes by it.
pub const NETWORK_LABEL: &str = "near-topology.network";
const SERVICE_LABEL: &str = "near-topology.service";
const RUN_ID_LABEL: &str = "near-topology.run-id";

/// Mount point of the shared directory inside every container.
pub const SHARED_DIR_MOUNT: &str = "/shared";

const EXEC_INSPECT_ATTEMPTS: u32 = 20;
const EXEC_INSPECT_DELAY: Duration = Duration::from_millis(50);

/// Settings for [`DockerOrchestrator`].
#[derive(Debug, Clone)]
pub struct DockerOrchestratorConfig {
    /// Network name; also the container-name prefix.
    pub network: String,
    /// Subnet in CIDR form.
    pub subnet: String,
    /// Publish container ports on 127.0.0.1 with ephemeral host ports.
    pub expose_host_ports: bool,
    /// Pull images that are not present locally.
    pub auto_pull: bool,
    /// Host directory under which per-service shared directories live.
    pub shared_root: PathBuf,
}

/// Connect to the Docker daemon using the platform defaults.
pub fn connect_docker() -> Result<Docker> {
    Docker::connect_with_local_defaults().map_err(|e| OrchestratorError::DockerNotAvailable {
        reason: e.to_string(),
    })
}

/// IPv4 subnet that service addresses are allocated from.
///
/// `.1` is reserved for the gateway, the network and broadcast addresses are
/// never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    base: u32,
    prefix: u8,
}

impl Subnet {
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base + 1)
    }

    /// The `index`-th assignable host address, starting at zero.
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        let size = 1u64 << (32 - u32::from(self.prefix));
        // network, gateway and broadcast are not assignable
        let assignable = size.saturating_sub(3);
        if u64::from(index) >= assignable {
            return None;
        }
        Some(Ipv4Addr::from(self.base + 2 + index))
    }
}

impl FromStr for Subnet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid subnet '{s}', expected CIDR like 172.28.0.0/24"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid subnet address in '{s}': {e}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid prefix length in '{s}': {e}"))?;
        if !(8..=30).contains(&prefix) {
            return Err(format!("prefix length in '{s}' must be between 8 and 30"));
        }
        let mask = u32::MAX << (32 - u32::from(prefix));
        Ok(Self {
            base: u32::from(addr) & mask,
            prefix,
        })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.base), self.prefix)
    }
}

/// Docker-backed orchestrator for one topology network.
pub struct DockerOrchestrator {
    docker: Docker,
    config: DockerOrchestratorConfig,
    subnet: Subnet,
    run_id: Uuid,
    next_host: Mutex<u32>,
    services: ServiceRegistry,
}

impl DockerOrchestrator {
    /// Connect to Docker and make sure the topology network exists.
    pub async fn connect(config: DockerOrchestratorConfig) -> Result<Self> {
        let subnet: Subnet =
            config
                .subnet
                .parse()
                .map_err(|reason| OrchestratorError::NetworkSetupFailed {
                    network: config.network.clone(),
                    reason,
                })?;

        let docker = connect_docker()?;
        docker
            .ping()
            .await
            .map_err(|e| OrchestratorError::DockerNotAvailable {
                reason: e.to_string(),
            })?;

        let orchestrator = Self {
            docker,
            config,
            subnet,
            run_id: Uuid::new_v4(),
            next_host: Mutex::new(0),
            services: ServiceRegistry::default(),
        };
        orchestrator.ensure_network().await?;

        tracing::debug!(
            network = %orchestrator.config.network,
            run_id = %orchestrator.run_id,
            "Docker orchestrator connected"
        );
        Ok(orchestrator)
    }

    /// Identifier stamped on every container this orchestrator creates.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    async fn ensure_network(&self) -> Result<()> {
        let name = &self.config.network;
        if let Ok(existing) = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            if !ipam_has_subnet(existing.ipam.as_ref(), &self.subnet) {
                return Err(OrchestratorError::NetworkSetupFailed {
                    network: name.clone(),
                    reason: format!(
                        "existing network does not use subnet {}; remove it or pick another network name",
                        self.subnet
                    ),
                });
            }
            tracing::debug!("Network '{}' already exists", name);
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name: name.clone(),
            driver: "bridge".to_string(),
            ipam: Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(self.subnet.to_string()),
                    gateway: Some(self.subnet.gateway().to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            labels: HashMap::from([(NETWORK_LABEL.to_string(), name.clone())]),
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| OrchestratorError::NetworkSetupFailed {
                network: name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(network = %name, subnet = %self.subnet, "Created topology network");
        Ok(())
    }

    async fn allocate_address(&self) -> Result<Ipv4Addr> {
        let mut next = self.next_host.lock().await;
        let ip = self
            .subnet
            .host(*next)
            .ok_or_else(|| OrchestratorError::AddressSpaceExhausted {
                subnet: self.subnet.to_string(),
            })?;
        *next += 1;
        Ok(ip)
    }

    fn container_name(&self, service_id: &ServiceId) -> String {
        format!("{}-{}", self.config.network, service_id)
    }

    fn shared_path_for(&self, service_id: &ServiceId) -> SharedPath {
        SharedPath {
            host_path: self
                .config
                .shared_root
                .join(&self.config.network)
                .join(service_id.as_str()),
            container_path: PathBuf::from(SHARED_DIR_MOUNT),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(OrchestratorError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn create_container(
        &self,
        service_id: &ServiceId,
        ip: Ipv4Addr,
        spec: &ContainerSpec,
        shared: &SharedPath,
    ) -> Result<String> {
        let container_name = self.container_name(service_id);
        let network = self.config.network.clone();

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|port| (port.to_string(), HashMap::new()))
            .collect();

        // Empty host port lets Docker pick an ephemeral one; we read it back after start.
        let port_bindings = self.config.expose_host_ports.then(|| {
            spec.ports
                .iter()
                .map(|port| {
                    (
                        port.to_string(),
                        Some(vec![DockerPortBinding {
                            host_ip: Some("127.0.0.1".to_string()),
                            host_port: None,
                        }]),
                    )
                })
                .collect::<HashMap<_, _>>()
        });

        let host_config = HostConfig {
            port_bindings,
            binds: Some(vec![format!(
                "{}:{}",
                shared.host_path.display(),
                shared.container_path.display()
            )]),
            network_mode: Some(network.clone()),
            auto_remove: Some(false),
            ..Default::default()
        };

        let networking_config = NetworkingConfig {
            endpoints_config: HashMap::from([(
                network.clone(),
                EndpointSettings {
                    ipam_config: Some(EndpointIpamConfig {
                        ipv4_address: Some(ip.to_string()),
                        ..Default::default()
                    }),
                    aliases: Some(vec![service_id.to_string()]),
                    ..Default::default()
                },
            )]),
        };

        let labels = HashMap::from([
            (NETWORK_LABEL.to_string(), network),
            (SERVICE_LABEL.to_string(), service_id.to_string()),
            (RUN_ID_LABEL.to_string(), self.run_id.to_string()),
        ]);

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(service_id.to_string()),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            labels: Some(labels),
            cmd: spec.cmd.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name,
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| OrchestratorError::ContainerCreationFailed {
                service: service_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(response.id)
    }

    async fn discover_port_bindings(
        &self,
        service_id: &ServiceId,
        container_id: &str,
    ) -> Result<HashMap<PortSpec, PortBinding>> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| OrchestratorError::InspectFailed {
                service: service_id.to_string(),
                reason: e.to_string(),
            })?;

        let ports = info
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();
        Ok(host_bindings_from_port_map(&ports))
    }

    /// Remove every container labelled with this network, then the network.
    ///
    /// Returns the number of containers removed. Missing network is not an
    /// error.
    pub async fn teardown(docker: &Docker, network: &str) -> Result<usize> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}={}", NETWORK_LABEL, network)],
            )]),
            ..Default::default()
        };

        let containers = docker.list_containers(Some(options)).await.map_err(|e| {
            OrchestratorError::TeardownFailed {
                network: network.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(|e| OrchestratorError::TeardownFailed {
                    network: network.to_string(),
                    reason: format!("removing container {id}: {e}"),
                })?;
            removed += 1;
        }

        if docker
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await
            .is_ok()
        {
            docker
                .remove_network(network)
                .await
                .map_err(|e| OrchestratorError::TeardownFailed {
                    network: network.to_string(),
                    reason: e.to_string(),
                })?;
        }

        tracing::info!(network, removed, "Topology torn down");
        Ok(removed)
    }
}

/// Convert Docker's `"<port>/<proto>" -> [bindings]` map into our types.
///
/// Ports without a published host port are skipped.
pub fn host_bindings_from_port_map(
    ports: &HashMap<String, Option<Vec<DockerPortBinding>>>,
) -> HashMap<PortSpec, PortBinding> {
    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let port: PortSpec = key.parse().ok()?;
            let binding = bindings.as_ref()?.iter().find_map(|b| {
                let host_port = b.host_port.as_deref()?.parse().ok()?;
                Some(PortBinding {
                    host_ip: b
                        .host_ip
                        .clone()
                        .filter(|ip| !ip.is_empty())
                        .unwrap_or_else(|| "0.0.0.0".to_string()),
                    host_port,
                })
            })?;
            Some((port, binding))
        })
        .collect()
}

/// Whether Docker answered "no such object".
fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Exit code of a finished exec, `None` while it is still running.
///
/// A finished exec without a recorded exit code counts as `-1`.
fn finished_exit_code(inspect: &ExecInspectResponse) -> Option<i64> {
    if inspect.running == Some(true) {
        return None;
    }
    Some(inspect.exit_code.unwrap_or(-1))
}

/// Whether an existing network's IPAM config includes `subnet`.
fn ipam_has_subnet(ipam: Option<&Ipam>, subnet: &Subnet) -> bool {
    ipam.and_then(|ipam| ipam.config.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|config| config.subnet.as_deref())
        .any(|candidate| candidate.parse::<Subnet>().ok().as_ref() == Some(subnet))
}

/// Service ids an orchestrator currently holds.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    ids: Mutex<HashSet<ServiceId>>,
}

impl ServiceRegistry {
    /// Claim `service_id`, failing if it is already taken.
    pub async fn reserve(&self, service_id: &ServiceId) -> Result<()> {
        if !self.ids.lock().await.insert(service_id.clone()) {
            return Err(OrchestratorError::ServiceExists {
                service: service_id.to_string(),
            });
        }
        Ok(())
    }

    /// Give `service_id` back so it can be added again.
    pub async fn release(&self, service_id: &ServiceId) {
        self.ids.lock().await.remove(service_id);
    }
}

#[async_trait]
impl ServiceOrchestrator for DockerOrchestrator {
    async fn add_service(
        &self,
        service_id: &ServiceId,
        spec: ContainerSpecSource,
    ) -> Result<AddedService> {
        self.services.reserve(service_id).await?;

        let result = self.start_service(service_id, spec).await;
        if result.is_err() {
            self.services.release(service_id).await;
        }
        result
    }

    async fn exec_command(&self, handle: &ServiceHandle, argv: &[String]) -> Result<ExecOutput> {
        let exec_failed = |reason: String| OrchestratorError::ExecFailed {
            service: handle.service_id.to_string(),
            command: argv.to_vec(),
            reason,
        };

        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&handle.container_id, options)
            .await
            .map_err(|e| exec_failed(e.to_string()))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| exec_failed(e.to_string()))?;

        let mut output = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = started
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdIn { .. }) => {}
                    Ok(log) => output.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                    Err(e) => return Err(exec_failed(e.to_string())),
                }
            }
        }

        // The attached stream can close before the daemon records the exit code.
        for _ in 0..EXEC_INSPECT_ATTEMPTS {
            let inspect = self
                .docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| exec_failed(e.to_string()))?;

            if let Some(exit_code) = finished_exit_code(&inspect) {
                return Ok(ExecOutput { exit_code, output });
            }
            tokio::time::sleep(EXEC_INSPECT_DELAY).await;
        }

        Err(exec_failed(format!(
            "still running {:?} after its output closed",
            EXEC_INSPECT_DELAY * EXEC_INSPECT_ATTEMPTS
        )))
    }

    fn shared_directory(&self, handle: &ServiceHandle) -> SharedPath {
        self.shared_path_for(&handle.service_id)
    }
}

impl DockerOrchestrator {
    async fn start_service(
        &self,
        service_id: &ServiceId,
        spec: ContainerSpecSource,
    ) -> Result<AddedService> {
        let ip = self.allocate_address().await?;
        let spec = spec.resolve(IpAddr::V4(ip));

        let container_name = self.container_name(service_id);

        // Remove a leftover container from a previous run
        if let Err(e) = self
            .docker
            .remove_container(
                &container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            && !is_not_found(&e)
        {
            return Err(OrchestratorError::ContainerCreationFailed {
                service: service_id.to_string(),
                reason: format!("removing leftover container {container_name}: {e}"),
            });
        }

        if self.config.auto_pull {
            self.pull_image(&spec.image).await?;
        }

        let shared = self.shared_path_for(service_id);
        tokio::fs::create_dir_all(&shared.host_path).await?;

        let container_id = self.create_container(service_id, ip, &spec, &shared).await?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::ContainerStartFailed {
                service: service_id.to_string(),
                reason: e.to_string(),
            })?;

        let host_port_bindings = self.discover_port_bindings(service_id, &container_id).await?;

        tracing::info!(
            service = %service_id,
            ip = %ip,
            container = %container_name,
            "Started service container"
        );

        Ok(AddedService {
            handle: ServiceHandle {
                service_id: service_id.clone(),
                container_id,
                ip_address: IpAddr::V4(ip),
            },
            host_port_bindings,
        })
    }
}
