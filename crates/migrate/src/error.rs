//! Error taxonomy for migration runs.
//!
//! Errors are split by the component that raises them. [`MigrationError`] is
//! what a run surfaces to its caller, always carrying the network and, once a
//! step has started, the step id.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use thiserror::Error;

use crate::Deployment;

/// Malformed step ordering or run parameters, detected before any network interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("migration steps must start at id 1, first step has id {first}")]
    NotStartingAtOne { first: u64 },

    #[error("duplicate migration step id {id}")]
    Duplicate { id: u64 },

    #[error("migration step {found} declared after step {previous}")]
    NonMonotonic { previous: u64, found: u64 },

    #[error("gap in migration steps: step {previous} is followed by step {found}")]
    Gap { previous: u64, found: u64 },

    #[error(
        "registry reports step {last_completed} complete but the highest known step is {highest:?}"
    )]
    RegistryAhead {
        last_completed: u64,
        highest: Option<u64>,
    },

    #[error("cannot start at step {from}: no step with that id exists")]
    UnknownStart { from: u64 },

    #[error("cannot start at step {from}: only steps up to {last_completed:?} are complete")]
    StartBeyondFrontier {
        from: u64,
        last_completed: Option<u64>,
    },

    #[error("deployment context belongs to network {context} but the runner targets {runner}")]
    NetworkMismatch { runner: String, context: String },
}

/// Raised by [`crate::DeploymentContext`] when a binding cannot be made or found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("`{name}` is already bound to {existing}")]
    Duplicate { name: String, existing: Address },

    #[error("`{name}` has not been deployed by an earlier step")]
    Unresolved { name: String },

    #[error("deployment of `{name}` targets network {found}, expected {expected}")]
    WrongNetwork {
        name: String,
        expected: String,
        found: String,
    },
}

/// Failure reported by a [`crate::NetworkAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The request reached the node but no usable answer came back.
    #[error("request interrupted: {0}")]
    Interrupted(String),

    /// A submission failed after an earlier attempt may have been accepted.
    #[error("submission outcome unknown: {0}")]
    MaybeSubmitted(String),

    #[error("transaction underpriced: {0}")]
    Underpriced(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl DeployError {
    /// Whether the same request may be sent again.
    ///
    /// Resubmitting is only safe because every transaction pins its nonce.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_)
                | Self::Interrupted(_)
                | Self::Underpriced(_)
                | Self::RateLimited(_)
        )
    }

    /// Whether a transaction may be pending on chain despite the error.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::MaybeSubmitted(_))
    }
}

/// Failure of the migration bookkeeping ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry unavailable")]
    Unavailable(#[source] DeployError),

    #[error("completion of step {step_id} was not confirmed (tx {transaction_id})")]
    NotConfirmed { step_id: u64, transaction_id: B256 },

    #[error("completion of step {step_id} reverted (tx {transaction_id})")]
    Reverted { step_id: u64, transaction_id: B256 },

    #[error("registry reports {found:?} after recording step {expected}")]
    NotReflected { expected: u64, found: Option<u64> },

    #[error("malformed registry response: {0}")]
    Malformed(String),

    #[error("registry is bound to network {expected}, got {found}")]
    WrongNetwork { expected: String, found: String },

    #[error("bookkeeping program deployment failed: {0}")]
    NotDeployed(String),
}

/// Run-level error surfaced by [`crate::StepRunner`].
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("step {step_id} on {network}: `{name}` has not been deployed by an earlier step")]
    UnresolvedDependency {
        network: String,
        step_id: u64,
        name: String,
    },

    #[error("step {step_id} on {network}: `{name}` is already bound to {existing}")]
    DuplicateBinding {
        network: String,
        step_id: u64,
        name: String,
        existing: Address,
    },

    #[error("step {step_id} on {network}: deployment of `{name}` failed")]
    Deploy {
        network: String,
        step_id: u64,
        name: String,
        #[source]
        source: DeployError,
    },

    #[error("step {step_id} on {network}: submission of `{name}` got no answer within {timeout:?}")]
    SubmissionTimeout {
        network: String,
        step_id: u64,
        name: String,
        timeout: Duration,
    },

    #[error(
        "step {step_id} on {network}: `{name}` (tx {transaction_id}) was not confirmed within {timeout:?}"
    )]
    ConfirmationTimeout {
        network: String,
        step_id: u64,
        name: String,
        transaction_id: B256,
        timeout: Duration,
    },

    #[error(
        "step {step_id} on {network}: lost track of `{name}` (tx {transaction_id}) while awaiting confirmation"
    )]
    ConfirmationUnknown {
        network: String,
        step_id: u64,
        name: String,
        transaction_id: B256,
        #[source]
        source: DeployError,
    },

    #[error("step {step_id} on {network}: deployed but completion could not be recorded")]
    RegistryWrite {
        network: String,
        step_id: u64,
        #[source]
        source: RegistryError,
    },

    #[error("failed to read the migration registry of {network}")]
    RegistryRead {
        network: String,
        #[source]
        source: RegistryError,
    },

    #[error("step {step_id} on {network}: {message}")]
    Step {
        network: String,
        step_id: u64,
        message: String,
    },

    #[error("run on {network} cancelled before step {next_step}")]
    Cancelled { network: String, next_step: u64 },
}

impl MigrationError {
    /// The step the error is attributed to, if a step had started.
    pub fn step_id(&self) -> Option<u64> {
        match self {
            Self::UnresolvedDependency { step_id, .. }
            | Self::DuplicateBinding { step_id, .. }
            | Self::Deploy { step_id, .. }
            | Self::SubmissionTimeout { step_id, .. }
            | Self::ConfirmationTimeout { step_id, .. }
            | Self::ConfirmationUnknown { step_id, .. }
            | Self::RegistryWrite { step_id, .. }
            | Self::Step { step_id, .. } => Some(*step_id),
            Self::Configuration(_) | Self::RegistryRead { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Whether on-chain state may have advanced past what the registry records.
    ///
    /// Such runs need manual reconciliation before they are resumed.
    pub fn is_indeterminate(&self) -> bool {
        match self {
            Self::RegistryWrite { .. }
            | Self::SubmissionTimeout { .. }
            | Self::ConfirmationTimeout { .. }
            | Self::ConfirmationUnknown { .. } => true,
            Self::Deploy { source, .. } => source.is_indeterminate(),
            _ => false,
        }
    }

    /// Attach step information to a context binding failure.
    pub(crate) fn from_binding(network: &str, step_id: u64, err: BindingError) -> Self {
        match err {
            BindingError::Duplicate { name, existing } => Self::DuplicateBinding {
                network: network.to_string(),
                step_id,
                name,
                existing,
            },
            BindingError::Unresolved { name } => Self::UnresolvedDependency {
                network: network.to_string(),
                step_id,
                name,
            },
            err @ BindingError::WrongNetwork { .. } => Self::Step {
                network: network.to_string(),
                step_id,
                message: err.to_string(),
            },
        }
    }
}

/// A halted run: the error, the bindings made so far and what was left unrecorded on chain.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// Why the run halted.
    #[source]
    pub error: MigrationError,
    /// Bindings as they stood at the halt.
    pub context: crate::DeploymentContext,
    /// Deployments confirmed on chain during the failing step, which is not recorded complete.
    pub unrecorded: Vec<Deployment>,
}

impl RunFailure {
    pub fn is_indeterminate(&self) -> bool {
        self.error.is_indeterminate()
    }
}
