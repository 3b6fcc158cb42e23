//! Client for the bookkeeping program that stores migration progress on chain.
//!
//! The program exposes two entry points:
//! - `last_completed_migration() returns (uint256)`, zero for a fresh network;
//! - `setCompleted(uint256)`, restricted to the program owner.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use chrono::Utc;

use crate::{
    Confirmation, MigrationRecord, MigrationRegistry, NetworkAdapter, ProgramArtifact,
    RegistryError,
};

const LAST_COMPLETED_SIGNATURE: &str = "last_completed_migration()";
const SET_COMPLETED_SIGNATURE: &str = "setCompleted(uint256)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `last_completed_migration()`.
pub fn encode_last_completed() -> Bytes {
    selector(LAST_COMPLETED_SIGNATURE).to_vec().into()
}

/// Calldata for `setCompleted(step_id)`.
pub fn encode_set_completed(step_id: u64) -> Bytes {
    let mut data = selector(SET_COMPLETED_SIGNATURE).to_vec();
    data.extend_from_slice(&U256::from(step_id).to_be_bytes::<32>());
    data.into()
}

/// Decode the `uint256` returned by `last_completed_migration()`.
pub fn decode_last_completed(output: &[u8]) -> Result<Option<u64>, RegistryError> {
    if output.len() != 32 {
        return Err(RegistryError::Malformed(format!(
            "expected a 32-byte word, got {} bytes",
            output.len()
        )));
    }
    let value = U256::from_be_slice(output);
    let last = u64::try_from(value)
        .map_err(|_| RegistryError::Malformed(format!("step id {value} out of range")))?;
    Ok((last != 0).then_some(last))
}

/// [`MigrationRegistry`] backed by a bookkeeping program on the target network.
#[derive(Debug, Clone)]
pub struct OnChainRegistry<A> {
    network: String,
    address: Address,
    adapter: A,
    confirmation_timeout: Duration,
    applied_by: Option<String>,
}

impl<A: NetworkAdapter> OnChainRegistry<A> {
    pub fn new(network: impl Into<String>, address: Address, adapter: A) -> Self {
        let applied_by = adapter.sender().map(|a| a.to_string());
        Self {
            network: network.into(),
            address,
            adapter,
            confirmation_timeout: crate::runner::DEFAULT_CONFIRMATION_TIMEOUT,
            applied_by,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_applied_by(mut self, applied_by: impl Into<String>) -> Self {
        self.applied_by = Some(applied_by.into());
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Deploy the bookkeeping program itself and return a registry bound to it.
    pub async fn deploy(
        network: impl Into<String>,
        adapter: A,
        artifact: &ProgramArtifact,
        confirmation_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let network = network.into();

        let submitted = adapter
            .deploy(artifact, &[])
            .await
            .map_err(|e| RegistryError::NotDeployed(e.to_string()))?;

        tracing::info!(
            network = %network,
            tx = %submitted.transaction_id,
            "Bookkeeping program submitted"
        );

        let address = match adapter
            .wait_for_confirmation(submitted.transaction_id, confirmation_timeout)
            .await
            .map_err(|e| RegistryError::NotDeployed(e.to_string()))?
        {
            Confirmation::Confirmed {
                contract_address, ..
            } => contract_address.unwrap_or(submitted.address),
            Confirmation::TimedOut => {
                return Err(RegistryError::NotDeployed(format!(
                    "transaction {} not confirmed within {:?}",
                    submitted.transaction_id, confirmation_timeout
                )));
            }
            Confirmation::Reverted { reason } => {
                return Err(RegistryError::NotDeployed(format!("reverted: {reason}")));
            }
        };

        tracing::info!(network = %network, address = %address, "Bookkeeping program deployed");

        Ok(Self::new(network, address, adapter).with_confirmation_timeout(confirmation_timeout))
    }

    fn check_network(&self, network: &str) -> Result<(), RegistryError> {
        if network != self.network {
            return Err(RegistryError::WrongNetwork {
                expected: self.network.clone(),
                found: network.to_string(),
            });
        }
        Ok(())
    }

    async fn read_last_completed(&self) -> Result<Option<u64>, RegistryError> {
        let output = self
            .adapter
            .call(self.address, encode_last_completed())
            .await
            .map_err(RegistryError::Unavailable)?;
        decode_last_completed(&output)
    }

    fn record(&self, step_id: u64, transaction_id: Option<B256>) -> MigrationRecord {
        MigrationRecord {
            step_id,
            network: self.network.clone(),
            completed_at: Utc::now(),
            applied_by: self.applied_by.clone(),
            transaction_id,
        }
    }
}

impl<A: NetworkAdapter> MigrationRegistry for OnChainRegistry<A> {
    async fn last_completed(&self, network: &str) -> Result<Option<u64>, RegistryError> {
        self.check_network(network)?;
        self.read_last_completed().await
    }

    async fn record_completion(
        &self,
        network: &str,
        step_id: u64,
    ) -> Result<MigrationRecord, RegistryError> {
        self.check_network(network)?;

        // A retried write after an unconfirmed first attempt must not move the
        // counter again.
        let current = self.read_last_completed().await?;
        if current.is_some_and(|last| last >= step_id) {
            tracing::debug!(
                network = %self.network,
                step_id,
                on_chain = ?current,
                "Completion already recorded"
            );
            return Ok(self.record(step_id, None));
        }

        let transaction_id = self
            .adapter
            .send(self.address, encode_set_completed(step_id))
            .await
            .map_err(RegistryError::Unavailable)?;

        match self
            .adapter
            .wait_for_confirmation(transaction_id, self.confirmation_timeout)
            .await
            .map_err(RegistryError::Unavailable)?
        {
            Confirmation::Confirmed { .. } => {}
            Confirmation::TimedOut => {
                return Err(RegistryError::NotConfirmed {
                    step_id,
                    transaction_id,
                });
            }
            Confirmation::Reverted { .. } => {
                return Err(RegistryError::Reverted {
                    step_id,
                    transaction_id,
                });
            }
        }

        let found = self.read_last_completed().await?;
        if found != Some(step_id) {
            return Err(RegistryError::NotReflected {
                expected: step_id,
                found,
            });
        }

        tracing::debug!(network = %self.network, step_id, tx = %transaction_id, "Completion recorded");

        Ok(self.record(step_id, Some(transaction_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{ConstructorArg, DeployError, SubmittedDeployment};

    /// Ledger emulating the bookkeeping program at `PROGRAM`.
    #[derive(Default)]
    struct Ledger {
        last: Mutex<u64>,
        writes: Mutex<Vec<u64>>,
        outcome: Option<Confirmation>,
        ignore_writes: bool,
    }

    const PROGRAM: Address = Address::repeat_byte(0x42);

    impl NetworkAdapter for &Ledger {
        async fn deploy(
            &self,
            _artifact: &ProgramArtifact,
            _args: &[ConstructorArg],
        ) -> Result<SubmittedDeployment, DeployError> {
            Ok(SubmittedDeployment {
                address: PROGRAM,
                transaction_id: B256::with_last_byte(0xde),
            })
        }

        async fn wait_for_confirmation(
            &self,
            _transaction_id: B256,
            _timeout: Duration,
        ) -> Result<Confirmation, DeployError> {
            Ok(self.outcome.clone().unwrap_or(Confirmation::Confirmed {
                block_number: 1,
                contract_address: None,
            }))
        }

        async fn send(&self, to: Address, data: Bytes) -> Result<B256, DeployError> {
            assert_eq!(to, PROGRAM);
            assert_eq!(data.len(), 36);
            assert_eq!(&data[..4], &selector(SET_COMPLETED_SIGNATURE));
            let step_id = u64::try_from(U256::from_be_slice(&data[4..])).unwrap();
            self.writes.lock().unwrap().push(step_id);
            if !self.ignore_writes {
                *self.last.lock().unwrap() = step_id;
            }
            Ok(B256::with_last_byte(step_id as u8))
        }

        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
            assert_eq!(to, PROGRAM);
            assert_eq!(data, encode_last_completed());
            let last = *self.last.lock().unwrap();
            Ok(U256::from(last).to_be_bytes::<32>().to_vec().into())
        }
    }

    #[test]
    fn test_decode_last_completed() {
        assert_eq!(decode_last_completed(&[0u8; 32]).unwrap(), None);

        let word = U256::from(7u64).to_be_bytes::<32>();
        assert_eq!(decode_last_completed(&word).unwrap(), Some(7));

        assert!(matches!(
            decode_last_completed(&[1, 2, 3]),
            Err(RegistryError::Malformed(_))
        ));
        assert!(matches!(
            decode_last_completed(&U256::MAX.to_be_bytes::<32>()),
            Err(RegistryError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_set_completed() {
        let data = encode_set_completed(3);
        assert_eq!(data.len(), 36);
        assert_eq!(data[35], 3);
        assert_ne!(&data[..4], &encode_last_completed()[..]);
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let ledger = Ledger::default();
        let registry = OnChainRegistry::new("devnet", PROGRAM, &ledger);

        assert_eq!(registry.last_completed("devnet").await.unwrap(), None);

        let record = registry.record_completion("devnet", 1).await.unwrap();
        assert_eq!(record.step_id, 1);
        assert_eq!(record.transaction_id, Some(B256::with_last_byte(1)));
        assert_eq!(registry.last_completed("devnet").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let ledger = Ledger::default();
        let registry = OnChainRegistry::new("devnet", PROGRAM, &ledger);

        registry.record_completion("devnet", 1).await.unwrap();
        let again = registry.record_completion("devnet", 1).await.unwrap();

        assert_eq!(again.transaction_id, None);
        assert_eq!(*ledger.writes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_unconfirmed_write_fails() {
        let ledger = Ledger {
            outcome: Some(Confirmation::TimedOut),
            ..Default::default()
        };
        let registry = OnChainRegistry::new("devnet", PROGRAM, &ledger);

        let err = registry.record_completion("devnet", 1).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotConfirmed { step_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_write_not_reflected() {
        let ledger = Ledger {
            ignore_writes: true,
            ..Default::default()
        };
        let registry = OnChainRegistry::new("devnet", PROGRAM, &ledger);

        let err = registry.record_completion("devnet", 2).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotReflected {
                expected: 2,
                found: None
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_network_is_rejected() {
        let ledger = Ledger::default();
        let registry = OnChainRegistry::new("devnet", PROGRAM, &ledger);

        assert!(matches!(
            registry.last_completed("mainnet").await,
            Err(RegistryError::WrongNetwork { .. })
        ));
        assert!(ledger.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_bookkeeping_program() {
        let ledger = Ledger::default();
        let artifact = ProgramArtifact::new("Migrations", vec![0x60, 0x80]);

        let registry =
            OnChainRegistry::deploy("devnet", &ledger, &artifact, Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(registry.address(), PROGRAM);
    }
}
