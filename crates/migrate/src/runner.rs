//! Migration execution engine.
//!
//! A [`StepRunner`] drives one network through its pending steps, strictly in
//! order: step `k + 1` never starts before step `k`'s completion is recorded.

use std::{fmt, time::Duration};

use tokio::sync::watch;

use crate::{
    ConfigurationError, Deployment, DeploymentContext, DeploymentReport, MigrationError,
    MigrationRegistry, NetworkAdapter, RunFailure, StepContext, StepPlan,
};

/// Default bound on awaiting a transaction submission.
pub const DEFAULT_SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on awaiting a transaction's inclusion.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Loading,
    ExecutingStep(u64),
    Completed,
    Aborted,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Loading => f.write_str("loading"),
            Self::ExecutingStep(id) => write!(f, "executing step {id}"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Parameters of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub submission_timeout: Duration,
    pub confirmation_timeout: Duration,
    /// Re-run from this step id instead of the registry frontier.
    pub from_step: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            submission_timeout: DEFAULT_SUBMISSION_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            from_step: None,
        }
    }
}

/// Outcome of a run that processed every pending step.
#[derive(Debug)]
pub struct RunReport {
    pub network: String,
    /// Registry frontier before the run started.
    pub previously_completed: Option<u64>,
    /// Step ids executed by this run, in order.
    pub executed: Vec<u64>,
    /// Every deployment known after the run, old and new.
    pub context: DeploymentContext,
}

impl RunReport {
    /// Last step recorded complete after this run.
    pub fn last_completed(&self) -> Option<u64> {
        self.executed.last().copied().or(self.previously_completed)
    }

    /// Result artifact for downstream consumers.
    pub fn to_deployment_report(&self) -> DeploymentReport {
        let mut report = DeploymentReport::new(&self.network);
        report.last_completed = self.last_completed();
        report.deployments = self.context.deployments().to_vec();
        report
    }
}

/// Orchestrates the migration of one network.
pub struct StepRunner<A: NetworkAdapter, R> {
    network: String,
    adapter: A,
    registry: R,
    plan: StepPlan<A>,
    options: RunOptions,
    cancel: Option<watch::Receiver<bool>>,
    state: RunnerState,
}

impl<A, R> StepRunner<A, R>
where
    A: NetworkAdapter,
    R: MigrationRegistry,
{
    pub fn new(network: impl Into<String>, adapter: A, registry: R, plan: StepPlan<A>) -> Self {
        Self {
            network: network.into(),
            adapter,
            registry,
            plan,
            options: RunOptions::default(),
            cancel: None,
            state: RunnerState::Idle,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop before the next step once `cancel` turns `true`.
    ///
    /// A step that has started always runs to a terminal outcome.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Execute every pending step, starting from bindings known to `context`.
    ///
    /// `context` holds deployments restored from earlier runs. Bindings made by
    /// steps the registry does not report complete are dropped first, since
    /// those steps are about to run again.
    pub async fn run(&mut self, mut context: DeploymentContext) -> Result<RunReport, RunFailure> {
        let network = self.network.clone();
        transition(&mut self.state, RunnerState::Loading, &network);

        if context.network() != network {
            let error = ConfigurationError::NetworkMismatch {
                runner: network.clone(),
                context: context.network().to_string(),
            };
            return Err(self.abort(error.into(), context, Vec::new()));
        }

        let previously_completed = match self.registry.last_completed(&network).await {
            Ok(last) => last,
            Err(source) => {
                let error = MigrationError::RegistryRead {
                    network: network.clone(),
                    source,
                };
                return Err(self.abort(error, context, Vec::new()));
            }
        };

        let first = match self
            .plan
            .first_pending(previously_completed, self.options.from_step)
        {
            Ok(first) => first,
            Err(error) => return Err(self.abort(error.into(), context, Vec::new())),
        };

        tracing::info!(
            network = %network,
            last_completed = ?previously_completed,
            first_pending = ?first,
            steps = self.plan.len(),
            "Migration plan loaded"
        );

        let Some(first) = first else {
            transition(&mut self.state, RunnerState::Completed, &network);
            tracing::info!(network = %network, "Network is up to date, nothing to migrate");
            return Ok(RunReport {
                network,
                previously_completed,
                executed: Vec::new(),
                context,
            });
        };

        for stale in context.forget_from(first) {
            tracing::warn!(
                network = %network,
                step_id = stale.step_id,
                name = %stale.name,
                address = %stale.address,
                "Dropping binding from a step that is not recorded complete"
            );
        }

        let mut executed = Vec::new();

        for step in self.plan.pending(first) {
            let step_id = step.id();

            if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                transition(&mut self.state, RunnerState::Aborted, &network);
                tracing::warn!(network = %network, next_step = step_id, "Run cancelled");
                return Err(RunFailure {
                    error: MigrationError::Cancelled {
                        network,
                        next_step: step_id,
                    },
                    context,
                    unrecorded: Vec::new(),
                });
            }

            transition(&mut self.state, RunnerState::ExecutingStep(step_id), &network);
            tracing::info!(network = %network, step_id, name = step.name(), "Executing step");

            let step_ctx = StepContext::new(
                step_id,
                &context,
                &self.adapter,
                self.options.submission_timeout,
                self.options.confirmation_timeout,
            );
            let result = step.execute(&step_ctx).await;
            let confirmed = step_ctx.into_confirmed();

            let deployments = match result {
                Ok(deployments) => deployments,
                Err(error) => {
                    transition(&mut self.state, RunnerState::Aborted, &network);
                    return Err(failure(error, context, confirmed));
                }
            };

            if let Err(err) = context.bind_all(deployments.clone()) {
                transition(&mut self.state, RunnerState::Aborted, &network);
                let error = MigrationError::from_binding(&network, step_id, err);
                return Err(failure(error, context, merge(confirmed, deployments)));
            }

            if let Err(source) = self.registry.record_completion(&network, step_id).await {
                transition(&mut self.state, RunnerState::Aborted, &network);
                let error = MigrationError::RegistryWrite {
                    network: network.clone(),
                    step_id,
                    source,
                };
                // Still bound in `context`, in case the write landed after all.
                return Err(failure(error, context, merge(confirmed, deployments)));
            }

            tracing::info!(
                network = %network,
                step_id,
                deployments = deployments.len(),
                "Step recorded complete"
            );
            executed.push(step_id);
        }

        transition(&mut self.state, RunnerState::Completed, &network);
        tracing::info!(
            network = %network,
            executed = executed.len(),
            deployments = context.len(),
            "Migration complete"
        );

        Ok(RunReport {
            network,
            previously_completed,
            executed,
            context,
        })
    }

    fn abort(
        &mut self,
        error: MigrationError,
        context: DeploymentContext,
        unrecorded: Vec<Deployment>,
    ) -> RunFailure {
        transition(&mut self.state, RunnerState::Aborted, &self.network);
        failure(error, context, unrecorded)
    }
}

fn transition(state: &mut RunnerState, next: RunnerState, network: &str) {
    tracing::debug!(network, from = %state, to = %next, "Runner state change");
    *state = next;
}

fn failure(
    error: MigrationError,
    context: DeploymentContext,
    unrecorded: Vec<Deployment>,
) -> RunFailure {
    if error.is_indeterminate() {
        tracing::error!(
            error = %error,
            "Run halted in an indeterminate state; reconcile manually before resuming"
        );
    } else {
        tracing::error!(error = %error, "Run halted");
    }
    for deployment in &unrecorded {
        tracing::error!(
            name = %deployment.name,
            address = %deployment.address,
            tx = %deployment.transaction_id,
            "Program deployed on chain but not recorded"
        );
    }
    RunFailure {
        error,
        context,
        unrecorded,
    }
}

/// Union of deployments confirmed through the step context and those the step returned.
fn merge(mut confirmed: Vec<Deployment>, returned: Vec<Deployment>) -> Vec<Deployment> {
    for deployment in returned {
        if !confirmed.contains(&deployment) {
            confirmed.push(deployment);
        }
    }
    confirmed
}
