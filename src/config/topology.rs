use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env, process_env};
use crate::error::ConfigError;
use crate::orchestrator::docker::DockerOrchestratorConfig;
use crate::readiness::RetryPolicy;
use crate::services::{ContractHelperConfig, NearupConfig, PostgresConfig};
use crate::topology::TopologyPlan;

/// Topology-wide settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Docker network name (also the container-name prefix).
    pub network: String,
    /// Subnet that service addresses are allocated from.
    pub subnet: String,
    /// Publish service ports on the host so they can be reached from outside.
    pub debug: bool,
    /// Pull images that are missing locally.
    pub auto_pull: bool,
    /// Host directory holding per-service shared directories.
    pub shared_root: PathBuf,
    /// Readiness polling for the database.
    pub db_readiness: RetryPolicy,
    pub postgres_image: String,
    pub nearup_image: String,
    pub contract_helper_image: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            network: "near-topology".to_string(),
            subnet: "172.28.0.0/24".to_string(),
            debug: false,
            auto_pull: true,
            shared_root: default_shared_root(),
            db_readiness: RetryPolicy::default(),
            postgres_image: crate::services::postgres::DEFAULT_IMAGE.to_string(),
            nearup_image: crate::services::nearup::DEFAULT_IMAGE.to_string(),
            contract_helper_image: crate::services::contract_helper::DEFAULT_IMAGE.to_string(),
        }
    }
}

impl TopologyConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&process_env)
    }

    /// Resolve using `env` to look variables up.
    pub fn resolve_from(env: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let attempts: u32 = parse_optional_env(
            env,
            "DB_READINESS_MAX_ATTEMPTS",
            defaults.db_readiness.max_attempts.get(),
        )?;
        let max_attempts = NonZeroU32::new(attempts).ok_or_else(|| ConfigError::InvalidValue {
            key: "DB_READINESS_MAX_ATTEMPTS".to_string(),
            message: "must be at least 1".to_string(),
        })?;
        let delay_ms: u64 = parse_optional_env(
            env,
            "DB_READINESS_DELAY_MS",
            defaults.db_readiness.delay.as_millis() as u64,
        )?;

        Ok(Self {
            network: optional_env(env, "NEAR_TOPOLOGY_NETWORK")?.unwrap_or(defaults.network),
            subnet: optional_env(env, "NEAR_TOPOLOGY_SUBNET")?.unwrap_or(defaults.subnet),
            debug: parse_bool_env(env, "NEAR_TOPOLOGY_DEBUG", defaults.debug)?,
            auto_pull: parse_bool_env(env, "NEAR_TOPOLOGY_AUTO_PULL", defaults.auto_pull)?,
            shared_root: optional_env(env, "NEAR_TOPOLOGY_SHARED_DIR")?
                .map(PathBuf::from)
                .unwrap_or(defaults.shared_root),
            db_readiness: RetryPolicy::new(max_attempts, Duration::from_millis(delay_ms)),
            postgres_image: optional_env(env, "POSTGRES_IMAGE")?.unwrap_or(defaults.postgres_image),
            nearup_image: optional_env(env, "NEARUP_IMAGE")?.unwrap_or(defaults.nearup_image),
            contract_helper_image: optional_env(env, "CONTRACT_HELPER_IMAGE")?
                .unwrap_or(defaults.contract_helper_image),
        })
    }

    /// Settings for the Docker orchestrator.
    pub fn to_docker_config(&self) -> DockerOrchestratorConfig {
        DockerOrchestratorConfig {
            network: self.network.clone(),
            subnet: self.subnet.clone(),
            expose_host_ports: self.debug,
            auto_pull: self.auto_pull,
            shared_root: self.shared_root.clone(),
        }
    }

    /// Per-service settings for [`assemble_topology`](crate::topology::assemble_topology).
    pub fn to_plan(&self) -> TopologyPlan {
        TopologyPlan {
            postgres: PostgresConfig {
                image: self.postgres_image.clone(),
                readiness: self.db_readiness,
                ..Default::default()
            },
            nearup: NearupConfig {
                image: self.nearup_image.clone(),
                ..Default::default()
            },
            contract_helper: ContractHelperConfig {
                image: self.contract_helper_image.clone(),
                ..Default::default()
            },
        }
    }
}

/// `<data-local-dir>/near-topology`, or under the temp dir when there is none.
pub fn default_shared_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("near-topology")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = TopologyConfig::resolve_from(&env_of(&[])).unwrap();

        assert_eq!(config.network, "near-topology");
        assert_eq!(config.subnet, "172.28.0.0/24");
        assert!(!config.debug);
        assert!(config.auto_pull);
        assert_eq!(config.db_readiness.max_attempts.get(), 10);
        assert_eq!(config.db_readiness.delay, Duration::from_millis(1000));
        assert_eq!(config.postgres_image, "postgres:13.4-alpine3.14");
    }

    #[test]
    fn test_overrides() {
        let config = TopologyConfig::resolve_from(&env_of(&[
            ("NEAR_TOPOLOGY_NETWORK", "ci-topology"),
            ("NEAR_TOPOLOGY_DEBUG", "TRUE"),
            ("DB_READINESS_MAX_ATTEMPTS", "3"),
            ("DB_READINESS_DELAY_MS", "50"),
            ("NEAR_TOPOLOGY_SHARED_DIR", "/tmp/shared"),
            ("NEARUP_IMAGE", "nearprotocol/nearup:1.2.0"),
        ]))
        .unwrap();

        assert_eq!(config.network, "ci-topology");
        assert!(config.debug);
        assert_eq!(config.db_readiness.max_attempts.get(), 3);
        assert_eq!(config.db_readiness.delay, Duration::from_millis(50));
        assert_eq!(config.shared_root, PathBuf::from("/tmp/shared"));

        let docker = config.to_docker_config();
        assert!(docker.expose_host_ports);
        assert_eq!(docker.network, "ci-topology");

        let plan = config.to_plan();
        assert_eq!(plan.nearup.image, "nearprotocol/nearup:1.2.0");
        assert_eq!(plan.postgres.readiness.max_attempts.get(), 3);
        assert_eq!(plan.postgres.databases, vec!["indexer".to_string()]);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = TopologyConfig::resolve_from(&env_of(&[("DB_READINESS_MAX_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DB_READINESS_MAX_ATTEMPTS")
        );
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let err = TopologyConfig::resolve_from(&env_of(&[("NEAR_TOPOLOGY_DEBUG", "yes")]))
            .unwrap_err();
        assert!(err.to_string().contains("NEAR_TOPOLOGY_DEBUG"));
    }

    #[test]
    fn test_empty_value_treated_as_unset() {
        let config =
            TopologyConfig::resolve_from(&env_of(&[("NEAR_TOPOLOGY_NETWORK", "  ")])).unwrap();
        assert_eq!(config.network, "near-topology");
    }
}
