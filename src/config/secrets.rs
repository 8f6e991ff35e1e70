use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::{optional_env, process_env};
use crate::error::ConfigError;

/// Secrets handed to services in the topology.
#[derive(Clone)]
pub struct TopologySecrets {
    /// Key the contract helper creates accounts with.
    pub account_creator_key: SecretString,
}

impl std::fmt::Debug for TopologySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologySecrets")
            .field(
                "account_creator_key",
                &(!self.account_creator_key.expose_secret().is_empty()),
            )
            .finish()
    }
}

impl TopologySecrets {
    pub fn new(account_creator_key: SecretString) -> Self {
        Self {
            account_creator_key,
        }
    }

    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&process_env)
    }

    pub fn resolve_from(env: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let key = optional_env(env, "ACCOUNT_CREATOR_KEY")?.ok_or_else(|| {
            ConfigError::MissingRequired {
                key: "ACCOUNT_CREATOR_KEY".to_string(),
                hint: "Set it to the key of the account the contract helper creates accounts from"
                    .to_string(),
            }
        })?;

        Ok(Self::new(SecretString::from(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_an_error() {
        let err = TopologySecrets::resolve_from(&|_: &str| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "ACCOUNT_CREATOR_KEY"));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let secrets = TopologySecrets::resolve_from(&|key: &str| {
            (key == "ACCOUNT_CREATOR_KEY").then(|| "ed25519:supersecret".to_string())
        })
        .unwrap();

        let rendered = format!("{:?}", secrets);
        assert!(!rendered.contains("supersecret"));
        assert_eq!(
            secrets.account_creator_key.expose_secret(),
            "ed25519:supersecret"
        );
    }
}
