//! In-memory registry of deployed programs for one network and one run.

use std::collections::{HashMap, HashSet};

use crate::{BindingError, Deployment};

/// Maps logical program names to their deployments.
///
/// A name, once bound, is never rebound within a run. Bindings keep the order
/// in which they were made so reports list programs in deployment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
    network: String,
    deployments: Vec<Deployment>,
    index: HashMap<String, usize>,
}

impl DeploymentContext {
    /// Create an empty context for `network`.
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            deployments: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild a context from deployments recorded by an earlier run.
    pub fn restore(
        network: impl Into<String>,
        deployments: impl IntoIterator<Item = Deployment>,
    ) -> Result<Self, BindingError> {
        let mut ctx = Self::new(network);
        for deployment in deployments {
            ctx.bind(deployment)?;
        }
        Ok(ctx)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Bind a deployment under its name.
    pub fn bind(&mut self, deployment: Deployment) -> Result<(), BindingError> {
        self.check(&deployment)?;
        self.index
            .insert(deployment.name.clone(), self.deployments.len());
        self.deployments.push(deployment);
        Ok(())
    }

    /// Bind a batch of deployments, or none of them if any binding would fail.
    pub fn bind_all(&mut self, deployments: Vec<Deployment>) -> Result<(), BindingError> {
        let mut seen = HashSet::new();
        for deployment in &deployments {
            self.check(deployment)?;
            if !seen.insert(deployment.name.as_str()) {
                return Err(BindingError::Duplicate {
                    name: deployment.name.clone(),
                    existing: deployment.address,
                });
            }
        }

        for deployment in deployments {
            self.index
                .insert(deployment.name.clone(), self.deployments.len());
            self.deployments.push(deployment);
        }
        Ok(())
    }

    /// Look up a deployment made by an earlier step.
    pub fn resolve(&self, name: &str) -> Result<&Deployment, BindingError> {
        self.get(name).ok_or_else(|| BindingError::Unresolved {
            name: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Deployment> {
        self.index.get(name).map(|&i| &self.deployments[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All bindings in the order they were made.
    pub fn deployments(&self) -> &[Deployment] {
        &self.deployments
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    /// Remove every binding produced by `step_id` or a later step, returning them.
    ///
    /// Used before (re-)executing steps from `step_id` so their bindings can be made again.
    pub fn forget_from(&mut self, step_id: u64) -> Vec<Deployment> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deployments)
            .into_iter()
            .partition(|d| d.step_id < step_id);

        self.index = kept
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        self.deployments = kept;
        dropped
    }

    pub fn into_deployments(self) -> Vec<Deployment> {
        self.deployments
    }

    fn check(&self, deployment: &Deployment) -> Result<(), BindingError> {
        if deployment.network != self.network {
            return Err(BindingError::WrongNetwork {
                name: deployment.name.clone(),
                expected: self.network.clone(),
                found: deployment.network.clone(),
            });
        }
        if let Some(existing) = self.get(&deployment.name) {
            return Err(BindingError::Duplicate {
                name: deployment.name.clone(),
                existing: existing.address,
            });
        }
        Ok(())
    }
}
