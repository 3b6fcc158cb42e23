//! Migration step contract, the context a step runs with, and plan validation.

use std::{sync::Mutex, time::Duration};

use derive_more::Deref;
use futures::future::BoxFuture;

use crate::{
    Confirmation, ConfigurationError, ConstructorArg, Deployment, DeploymentContext,
    MigrationError, NetworkAdapter, ProgramArtifact,
};

/// An ordered, externally authored unit of deployment work.
///
/// Ids start at 1 and increase by one per step. Steps are never edited or
/// removed once a network has applied them.
pub trait MigrationStep<A: NetworkAdapter>: Send + Sync {
    fn id(&self) -> u64;

    fn name(&self) -> &str;

    /// Perform the step's deployments, returning the ones to bind.
    fn execute<'a>(
        &'a self,
        ctx: &'a StepContext<'a, A>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>, MigrationError>>;
}

/// Everything a step may touch while it runs.
pub struct StepContext<'a, A> {
    network: &'a str,
    step_id: u64,
    deployments: &'a DeploymentContext,
    adapter: &'a A,
    submission_timeout: Duration,
    confirmation_timeout: Duration,
    confirmed: Mutex<Vec<Deployment>>,
}

impl<'a, A: NetworkAdapter> StepContext<'a, A> {
    pub(crate) fn new(
        step_id: u64,
        deployments: &'a DeploymentContext,
        adapter: &'a A,
        submission_timeout: Duration,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            network: deployments.network(),
            step_id,
            deployments,
            adapter,
            submission_timeout,
            confirmation_timeout,
            confirmed: Mutex::new(Vec::new()),
        }
    }

    pub fn network(&self) -> &str {
        self.network
    }

    pub fn step_id(&self) -> u64 {
        self.step_id
    }

    /// Deployments bound by earlier steps.
    pub fn deployments(&self) -> &DeploymentContext {
        self.deployments
    }

    pub fn adapter(&self) -> &A {
        self.adapter
    }

    /// Address-bearing deployment produced by an earlier step.
    ///
    /// Fails before anything is submitted, so a step never deploys against a
    /// missing dependency.
    pub fn resolve(&self, name: &str) -> Result<&Deployment, MigrationError> {
        self.deployments
            .resolve(name)
            .map_err(|e| MigrationError::from_binding(self.network, self.step_id, e))
    }

    /// Deploy `artifact` under the logical `name` and wait for it to be confirmed.
    ///
    /// Once submitted, the transaction is always awaited to a terminal outcome
    /// or the confirmation timeout.
    pub async fn deploy(
        &self,
        name: impl Into<String>,
        artifact: &ProgramArtifact,
        args: &[ConstructorArg],
    ) -> Result<Deployment, MigrationError> {
        let name = name.into();

        tracing::info!(
            network = %self.network,
            step_id = self.step_id,
            name = %name,
            program = %artifact.contract_name,
            args = args.len(),
            "Submitting deployment"
        );

        let submitted = tokio::time::timeout(
            self.submission_timeout,
            self.adapter.deploy(artifact, args),
        )
        .await
        .map_err(|_| MigrationError::SubmissionTimeout {
            network: self.network.to_string(),
            step_id: self.step_id,
            name: name.clone(),
            timeout: self.submission_timeout,
        })?
        .map_err(|source| self.deploy_error(&name, source))?;

        tracing::debug!(
            network = %self.network,
            step_id = self.step_id,
            name = %name,
            tx = %submitted.transaction_id,
            "Awaiting confirmation"
        );

        // The transaction is out; from here on an error leaves its fate unknown.
        let confirmation = self
            .adapter
            .wait_for_confirmation(submitted.transaction_id, self.confirmation_timeout)
            .await
            .map_err(|source| MigrationError::ConfirmationUnknown {
                network: self.network.to_string(),
                step_id: self.step_id,
                name: name.clone(),
                transaction_id: submitted.transaction_id,
                source,
            })?;

        let address = match confirmation {
            Confirmation::Confirmed {
                block_number,
                contract_address,
            } => {
                let address = contract_address.unwrap_or(submitted.address);
                if address != submitted.address {
                    tracing::warn!(
                        name = %name,
                        predicted = %submitted.address,
                        actual = %address,
                        "Program landed at a different address than predicted"
                    );
                }
                tracing::info!(
                    network = %self.network,
                    step_id = self.step_id,
                    name = %name,
                    address = %address,
                    block_number,
                    "Deployment confirmed"
                );
                address
            }
            Confirmation::TimedOut => {
                return Err(MigrationError::ConfirmationTimeout {
                    network: self.network.to_string(),
                    step_id: self.step_id,
                    name,
                    transaction_id: submitted.transaction_id,
                    timeout: self.confirmation_timeout,
                });
            }
            Confirmation::Reverted { reason } => {
                return Err(self.deploy_error(&name, crate::DeployError::Reverted(reason)));
            }
        };

        let deployment = Deployment {
            name,
            address,
            transaction_id: submitted.transaction_id,
            network: self.network.to_string(),
            step_id: self.step_id,
        };

        self.confirmed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(deployment.clone());

        Ok(deployment)
    }

    /// Report an authoring failure for this step.
    pub fn fail(&self, message: impl Into<String>) -> MigrationError {
        MigrationError::Step {
            network: self.network.to_string(),
            step_id: self.step_id,
            message: message.into(),
        }
    }

    /// Deployments confirmed on chain through this context.
    pub(crate) fn into_confirmed(self) -> Vec<Deployment> {
        self.confirmed
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deploy_error(&self, name: &str, source: crate::DeployError) -> MigrationError {
        MigrationError::Deploy {
            network: self.network.to_string(),
            step_id: self.step_id,
            name: name.to_string(),
            source,
        }
    }
}

/// Validated, ordered list of migration steps.
#[derive(Deref)]
pub struct StepPlan<A: NetworkAdapter> {
    #[deref]
    steps: Vec<Box<dyn MigrationStep<A>>>,
}

impl<A: NetworkAdapter> StepPlan<A> {
    /// Validate that ids start at 1 and increase by exactly one per step.
    pub fn new(steps: Vec<Box<dyn MigrationStep<A>>>) -> Result<Self, ConfigurationError> {
        let mut previous: Option<u64> = None;
        for step in &steps {
            let id = step.id();
            match previous {
                None if id != 1 => return Err(ConfigurationError::NotStartingAtOne { first: id }),
                Some(prev) if id == prev => return Err(ConfigurationError::Duplicate { id }),
                Some(prev) if id < prev => {
                    return Err(ConfigurationError::NonMonotonic {
                        previous: prev,
                        found: id,
                    });
                }
                Some(prev) if id > prev + 1 => {
                    return Err(ConfigurationError::Gap {
                        previous: prev,
                        found: id,
                    });
                }
                _ => {}
            }
            previous = Some(id);
        }
        Ok(Self { steps })
    }

    /// Id of the last step, `None` for an empty plan.
    pub fn highest(&self) -> Option<u64> {
        self.steps.last().map(|s| s.id())
    }

    /// First step to execute given the registry state and an optional forced start.
    ///
    /// Returns `None` when nothing is pending.
    pub fn first_pending(
        &self,
        last_completed: Option<u64>,
        from: Option<u64>,
    ) -> Result<Option<u64>, ConfigurationError> {
        let highest = self.highest();

        if let Some(last) = last_completed {
            if highest.is_none_or(|h| last > h) {
                return Err(ConfigurationError::RegistryAhead {
                    last_completed: last,
                    highest,
                });
            }
        }

        let frontier = last_completed.map_or(1, |last| last + 1);

        let next = match from {
            Some(from) => {
                if from == 0 || highest.is_none_or(|h| from > h) {
                    return Err(ConfigurationError::UnknownStart { from });
                }
                if from > frontier {
                    return Err(ConfigurationError::StartBeyondFrontier {
                        from,
                        last_completed,
                    });
                }
                from
            }
            None => frontier,
        };

        Ok(highest.filter(|&h| next <= h).map(|_| next))
    }

    /// Steps with id `>= from`, in ascending order.
    pub fn pending(&self, from: u64) -> impl Iterator<Item = &dyn MigrationStep<A>> {
        self.steps
            .iter()
            .filter(move |s| s.id() >= from)
            .map(|s| s.as_ref())
    }
}
