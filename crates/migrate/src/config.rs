//! Layered configuration: built-in defaults, then `Waymark.toml`, then `WAYMARK_*` variables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::RunOptions;

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Waymark.toml";

/// Prefix of environment variables overriding the configuration file.
///
/// Nested keys are separated by a double underscore, e.g.
/// `WAYMARK_NETWORKS__SEPOLIA__RPC_URL`.
pub const ENV_PREFIX: &str = "WAYMARK_";

/// Settings shared by every network of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Directory holding compiled program artifacts.
    pub artifacts_dir: PathBuf,
    /// Directory for address books, locks and reports.
    pub outdata: PathBuf,
    pub submission_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    /// Interval between receipt polls.
    pub poll_interval_ms: u64,
    /// Bounded retries of transient submission failures.
    pub max_submit_retries: usize,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Connection settings of one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Url,
    /// Unlocked account submitting transactions.
    pub from: Address,
    /// Address of the bookkeeping program, once deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Operator identity stamped on completion records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_by: Option<String>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("build/contracts"),
            outdata: PathBuf::from("data-waymark"),
            submission_timeout_secs: crate::runner::DEFAULT_SUBMISSION_TIMEOUT.as_secs(),
            confirmation_timeout_secs: crate::runner::DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            poll_interval_ms: 1_000,
            max_submit_retries: 3,
            networks: BTreeMap::new(),
        }
    }
}

impl MigrateConfig {
    /// Load the configuration, reading `path` if it exists.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            format!(
                "Network `{name}` is not configured (known: {})",
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_options(&self, from_step: Option<u64>) -> RunOptions {
        RunOptions {
            submission_timeout: self.submission_timeout(),
            confirmation_timeout: self.confirmation_timeout(),
            from_step,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn sample() -> MigrateConfig {
        let mut config = MigrateConfig::default();
        config.networks.insert(
            "sepolia".to_string(),
            NetworkConfig {
                rpc_url: Url::parse("http://localhost:8545").unwrap(),
                from: Address::with_last_byte(0xaa),
                registry: Some(Address::with_last_byte(0x42)),
                gas_limit: Some(6_000_000),
                applied_by: None,
            },
        );
        config
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new("waymark-config").expect("Failed to create temp dir");
        let config = MigrateConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();

        assert_eq!(config.max_submit_retries, 3);
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(120));
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_saved_file_is_loaded_back() {
        let dir = TempDir::new("waymark-config").expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILENAME);

        let config = sample();
        config.save_to_file(&path).unwrap();

        let loaded = MigrateConfig::load(&path).unwrap();
        assert_eq!(loaded.networks, config.networks);
        assert_eq!(loaded.network("sepolia").unwrap().gas_limit, Some(6_000_000));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new("waymark-config").expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
confirmation_timeout_secs = 5

[networks.devnet]
rpc_url = "http://127.0.0.1:8545/"
from = "0x00000000000000000000000000000000000000aa"
"#,
        )
        .unwrap();

        let config = MigrateConfig::load(&path).unwrap();
        assert_eq!(config.confirmation_timeout_secs, 5);
        assert_eq!(config.poll_interval_ms, 1_000);

        let devnet = config.network("devnet").unwrap();
        assert_eq!(devnet.from, Address::with_last_byte(0xaa));
        assert_eq!(devnet.registry, None);

        let options = config.run_options(Some(2));
        assert_eq!(options.from_step, Some(2));
        assert_eq!(options.confirmation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_network() {
        let err = sample().network("mainnet").unwrap_err();
        assert!(err.to_string().contains("sepolia"));
    }
}
