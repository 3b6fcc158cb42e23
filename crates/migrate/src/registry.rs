//! Durable record of completed migration steps.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Mutex},
};

use alloy_core::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Completion of one step on one network. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub step_id: u64,
    pub network: String,
    pub completed_at: DateTime<Utc>,
    pub applied_by: Option<String>,
    /// Transaction that wrote the record, when the registry lives on chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<B256>,
}

/// Source of truth for resumability.
///
/// Reads reflect every prior successful write for the same network, and
/// recording the same `(network, step_id)` twice never creates a second or
/// conflicting record.
pub trait MigrationRegistry: Send + Sync {
    /// Highest completed step id, or `None` for a fresh network.
    fn last_completed(
        &self,
        network: &str,
    ) -> impl Future<Output = Result<Option<u64>, RegistryError>> + Send;

    /// Durably mark `step_id` complete on `network`.
    fn record_completion(
        &self,
        network: &str,
        step_id: u64,
    ) -> impl Future<Output = Result<MigrationRecord, RegistryError>> + Send;
}

impl<R: MigrationRegistry> MigrationRegistry for &R {
    fn last_completed(
        &self,
        network: &str,
    ) -> impl Future<Output = Result<Option<u64>, RegistryError>> + Send {
        (**self).last_completed(network)
    }

    fn record_completion(
        &self,
        network: &str,
        step_id: u64,
    ) -> impl Future<Output = Result<MigrationRecord, RegistryError>> + Send {
        (**self).record_completion(network, step_id)
    }
}

impl<R: MigrationRegistry> MigrationRegistry for Arc<R> {
    fn last_completed(
        &self,
        network: &str,
    ) -> impl Future<Output = Result<Option<u64>, RegistryError>> + Send {
        (**self).last_completed(network)
    }

    fn record_completion(
        &self,
        network: &str,
        step_id: u64,
    ) -> impl Future<Output = Result<MigrationRecord, RegistryError>> + Send {
        (**self).record_completion(network, step_id)
    }
}

/// Process-local registry, for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    applied_by: Option<String>,
    records: Mutex<HashMap<String, BTreeMap<u64, MigrationRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every record with `applied_by`.
    pub fn with_applied_by(mut self, applied_by: impl Into<String>) -> Self {
        self.applied_by = Some(applied_by.into());
        self
    }

    /// Seed `network` as if steps `1..=last` had completed.
    pub fn seeded(self, network: &str, last: u64) -> Self {
        {
            let mut records = self.lock();
            let entries = records.entry(network.to_string()).or_default();
            for step_id in 1..=last {
                entries.insert(step_id, self.record(network, step_id));
            }
        }
        self
    }

    /// Records of `network` in step order.
    pub fn records(&self, network: &str) -> Vec<MigrationRecord> {
        self.lock()
            .get(network)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, network: &str, step_id: u64) -> MigrationRecord {
        MigrationRecord {
            step_id,
            network: network.to_string(),
            completed_at: Utc::now(),
            applied_by: self.applied_by.clone(),
            transaction_id: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<u64, MigrationRecord>>> {
        // Every insert is a single call, so a poisoned map is still consistent.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MigrationRegistry for InMemoryRegistry {
    async fn last_completed(&self, network: &str) -> Result<Option<u64>, RegistryError> {
        Ok(self
            .lock()
            .get(network)
            .and_then(|entries| entries.keys().next_back().copied()))
    }

    async fn record_completion(
        &self,
        network: &str,
        step_id: u64,
    ) -> Result<MigrationRecord, RegistryError> {
        let record = self.record(network, step_id);
        let mut records = self.lock();
        let entry = records
            .entry(network.to_string())
            .or_default()
            .entry(step_id)
            .or_insert(record);
        Ok(entry.clone())
    }
}
