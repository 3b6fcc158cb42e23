//! Narrow interface to the ledger a migration targets.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};

use crate::{ConstructorArg, DeployError, ProgramArtifact};

/// A deployment transaction accepted by the network but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedDeployment {
    /// Address the program will live at once the transaction is included.
    pub address: Address,
    pub transaction_id: B256,
}

/// Terminal outcome of waiting for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Included and successful. `contract_address` is set for deployments.
    Confirmed {
        block_number: u64,
        contract_address: Option<Address>,
    },
    /// Not included within the timeout. The transaction may still land.
    TimedOut,
    /// Included but execution failed.
    Reverted { reason: String },
}

/// Submits transactions to a network and observes their inclusion.
///
/// Implementations may retry transient submission failures a bounded number
/// of times, but only when the retry cannot produce a second program.
pub trait NetworkAdapter: Send + Sync {
    /// Submit a deployment of `artifact` constructed with `args`.
    fn deploy(
        &self,
        artifact: &ProgramArtifact,
        args: &[ConstructorArg],
    ) -> impl Future<Output = Result<SubmittedDeployment, DeployError>> + Send;

    /// Wait until `transaction_id` is included or `timeout` elapses.
    fn wait_for_confirmation(
        &self,
        transaction_id: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<Confirmation, DeployError>> + Send;

    /// Submit a call transaction to an existing program.
    fn send(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<B256, DeployError>> + Send;

    /// Read-only call against the latest state.
    fn call(&self, to: Address, data: Bytes)
    -> impl Future<Output = Result<Bytes, DeployError>> + Send;

    /// Identity submitting transactions, recorded in completion records.
    fn sender(&self) -> Option<Address> {
        None
    }
}
