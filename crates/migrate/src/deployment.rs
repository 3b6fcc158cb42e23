//! Deployment records and the per-network result artifact.

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A program deployed by a migration step.
///
/// Created once per (step, network) on confirmation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Logical role of the program, e.g. `Wallet`.
    pub name: String,
    /// Address of the deployed program.
    pub address: Address,
    /// Transaction that created the program.
    pub transaction_id: B256,
    /// Network the program lives on.
    pub network: String,
    /// Migration step that produced the deployment.
    pub step_id: u64,
}

/// Result artifact listing every deployment known for a network.
///
/// Stored by [`crate::JsonAddressBook`] and meant for downstream consumers such
/// as client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub network: String,
    /// Last step the registry reports complete.
    pub last_completed: Option<u64>,
    /// Address of the bookkeeping program, if one is deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Address>,
    pub generated_at: DateTime<Utc>,
    pub deployments: Vec<Deployment>,
    /// Programs confirmed on chain by a halted step but never recorded as complete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecorded: Vec<Deployment>,
}

impl DeploymentReport {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            last_completed: None,
            registry: None,
            generated_at: Utc::now(),
            deployments: Vec::new(),
            unrecorded: Vec::new(),
        }
    }

    /// Find a deployment by its logical name.
    pub fn get(&self, name: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.name == name)
    }
}
