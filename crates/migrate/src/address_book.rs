//! Persistence of deployment reports between runs.
//!
//! The registry only records how far a network got; the address book keeps
//! the addresses earlier steps produced so later runs can resolve them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{DeploymentContext, DeploymentReport};

/// Store of per-network deployment reports.
pub trait AddressBook {
    /// Last stored report for `network`, `None` if the network never ran.
    fn load(&self, network: &str) -> Result<Option<DeploymentReport>>;

    /// Persist `report`, replacing the previous one for its network.
    fn store(&self, report: &DeploymentReport) -> Result<()>;

    /// Context pre-populated with the deployments stored for `network`.
    fn restore_context(&self, network: &str) -> Result<DeploymentContext> {
        let Some(report) = self.load(network)? else {
            return Ok(DeploymentContext::new(network));
        };

        DeploymentContext::restore(network, report.deployments)
            .with_context(|| format!("Stored deployments of {network} are inconsistent"))
    }
}

/// Address book writing one JSON file per network under `<outdata>/deployments/`.
#[derive(Debug, Clone)]
pub struct JsonAddressBook {
    dir: PathBuf,
}

impl JsonAddressBook {
    pub fn new(outdata: &Path) -> Self {
        Self {
            dir: outdata.join("deployments"),
        }
    }

    pub fn path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.json"))
    }
}

impl AddressBook for JsonAddressBook {
    fn load(&self, network: &str) -> Result<Option<DeploymentReport>> {
        let path = self.path(network);
        if !path.exists() {
            tracing::debug!(network, path = %path.display(), "No address book yet");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read address book {}", path.display()))?;
        let report: DeploymentReport = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse address book {}", path.display()))?;

        if report.network != network {
            anyhow::bail!(
                "Address book {} belongs to network {}, expected {network}",
                path.display(),
                report.network
            );
        }

        Ok(Some(report))
    }

    fn store(&self, report: &DeploymentReport) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path(&report.network);
        let staging = path.with_extension("json.tmp");

        let json =
            serde_json::to_string_pretty(report).context("Failed to serialize deployment report")?;
        std::fs::write(&staging, json)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        std::fs::rename(&staging, &path)
            .with_context(|| format!("Failed to move address book into {}", path.display()))?;

        tracing::info!(
            network = %report.network,
            path = %path.display(),
            deployments = report.deployments.len(),
            "Address book saved"
        );
        Ok(())
    }
}
