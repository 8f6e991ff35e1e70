//! Error types for the orchestrator boundary.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors reported by a [`ServiceOrchestrator`](super::ServiceOrchestrator).
///
/// These are never retried by the provisioning layer; callers propagate them
/// as-is.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Docker is not available.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to set up the topology network.
    #[error("Failed to set up network '{network}': {reason}")]
    NetworkSetupFailed {
        /// Network name.
        network: String,
        /// Reason for failure.
        reason: String,
    },

    /// No address left in the configured subnet.
    #[error("No free address left in subnet {subnet}")]
    AddressSpaceExhausted {
        /// Subnet in CIDR form.
        subnet: String,
    },

    /// A service with this id was already added.
    #[error("Service '{service}' already exists")]
    ServiceExists {
        /// Service id.
        service: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container for service '{service}': {reason}")]
    ContainerCreationFailed {
        /// Service id.
        service: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container for service '{service}': {reason}")]
    ContainerStartFailed {
        /// Service id.
        service: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to inspect a running container.
    #[error("Failed to inspect container for service '{service}': {reason}")]
    InspectFailed {
        /// Service id.
        service: String,
        /// Reason for failure.
        reason: String,
    },

    /// Running a command inside a container failed before it produced an exit code.
    #[error("Failed to exec {command:?} in service '{service}': {reason}")]
    ExecFailed {
        /// Service id.
        service: String,
        /// Command argv.
        command: Vec<String>,
        /// Reason for failure.
        reason: String,
    },

    /// Tearing down the topology failed.
    #[error("Teardown of network '{network}' failed: {reason}")]
    TeardownFailed {
        /// Network name.
        network: String,
        /// Reason for failure.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
