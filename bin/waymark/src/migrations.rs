//! Migration steps shipped with the tool, in execution order.
//!
//! Never edit or remove a step once a network has applied it; append a new
//! one instead.

use waymark_migrate::{
    ArtifactStore, BoxFuture, ConfigurationError, Deployment, MigrationError, MigrationStep,
    NetworkAdapter, ProgramArtifact, StepContext, StepPlan,
};

/// Logical name of the wallet implementation.
pub const WALLET: &str = "Wallet";

/// Logical name of the wallet factory.
pub const FACTORY: &str = "Factory";

/// Every step, validated.
pub fn plan<A: NetworkAdapter>(artifacts: &ArtifactStore) -> Result<StepPlan<A>, ConfigurationError> {
    let steps: Vec<Box<dyn MigrationStep<A>>> = vec![
        Box::new(WalletImplementation {
            artifacts: artifacts.clone(),
        }),
        Box::new(WalletFactory {
            artifacts: artifacts.clone(),
        }),
    ];
    StepPlan::new(steps)
}

fn load<A: NetworkAdapter>(
    ctx: &StepContext<'_, A>,
    artifacts: &ArtifactStore,
    name: &str,
) -> Result<ProgramArtifact, MigrationError> {
    artifacts.require(name).map_err(|e| ctx.fail(format!("{e:#}")))
}

/// Step 1: the wallet implementation every factory-made wallet delegates to.
struct WalletImplementation {
    artifacts: ArtifactStore,
}

impl<A: NetworkAdapter> MigrationStep<A> for WalletImplementation {
    fn id(&self) -> u64 {
        1
    }

    fn name(&self) -> &str {
        "wallet implementation"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a StepContext<'a, A>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>, MigrationError>> {
        Box::pin(async move {
            let artifact = load(ctx, &self.artifacts, "Wallet")?;
            let wallet = ctx.deploy(WALLET, &artifact, &[]).await?;
            Ok(vec![wallet])
        })
    }
}

/// Step 2: the factory, constructed with the wallet implementation address.
struct WalletFactory {
    artifacts: ArtifactStore,
}

impl<A: NetworkAdapter> MigrationStep<A> for WalletFactory {
    fn id(&self) -> u64 {
        2
    }

    fn name(&self) -> &str {
        "wallet factory"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a StepContext<'a, A>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>, MigrationError>> {
        Box::pin(async move {
            let wallet = ctx.resolve(WALLET)?.address;
            let artifact = load(ctx, &self.artifacts, "WalletFactory")?;
            let factory = ctx.deploy(FACTORY, &artifact, &[wallet.into()]).await?;
            Ok(vec![factory])
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_core::primitives::{Address, B256, Bytes};
    use tempdir::TempDir;
    use waymark_migrate::{
        Confirmation, ConstructorArg, DeployError, DeploymentContext, InMemoryRegistry,
        MigrationError, StepRunner, SubmittedDeployment,
    };

    use super::*;

    const SENDER: Address = Address::repeat_byte(0x5e);

    /// Confirms every deployment at the address predicted from its index.
    #[derive(Default)]
    struct Devnet {
        deployed: std::sync::Mutex<Vec<(String, Vec<ConstructorArg>)>>,
    }

    impl NetworkAdapter for Devnet {
        async fn deploy(
            &self,
            artifact: &ProgramArtifact,
            args: &[ConstructorArg],
        ) -> Result<SubmittedDeployment, DeployError> {
            let mut deployed = self.deployed.lock().unwrap();
            let nonce = deployed.len() as u64;
            deployed.push((artifact.contract_name.clone(), args.to_vec()));
            Ok(SubmittedDeployment {
                address: SENDER.create(nonce),
                transaction_id: B256::with_last_byte(nonce as u8),
            })
        }

        async fn wait_for_confirmation(
            &self,
            _transaction_id: B256,
            _timeout: Duration,
        ) -> Result<Confirmation, DeployError> {
            Ok(Confirmation::Confirmed {
                block_number: 1,
                contract_address: None,
            })
        }

        async fn send(&self, _to: Address, _data: Bytes) -> Result<B256, DeployError> {
            Err(DeployError::Rejected("unsupported".into()))
        }

        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, DeployError> {
            Err(DeployError::Rejected("unsupported".into()))
        }
    }

    fn artifacts(names: &[&str]) -> (TempDir, ArtifactStore) {
        let dir = TempDir::new("waymark-migrations").expect("Failed to create temp dir");
        for name in names {
            std::fs::write(
                dir.path().join(format!("{name}.json")),
                format!(r#"{{ "contractName": "{name}", "abi": [], "bytecode": "0x6080" }}"#),
            )
            .unwrap();
        }
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_factory_is_built_with_wallet_address() {
        let (_dir, store) = artifacts(&["Wallet", "WalletFactory"]);
        let plan = plan::<Devnet>(&store).unwrap();
        let mut runner = StepRunner::new("devnet", Devnet::default(), InMemoryRegistry::new(), plan);

        let report = runner.run(DeploymentContext::new("devnet")).await.unwrap();

        let wallet = report.context.resolve(WALLET).unwrap().address;
        let factory = report.context.resolve(FACTORY).unwrap().address;
        assert_eq!(wallet, SENDER.create(0));
        assert_eq!(factory, SENDER.create(1));

        let deployed = runner.adapter().deployed.lock().unwrap().clone();
        assert_eq!(
            deployed,
            vec![
                ("Wallet".to_string(), vec![]),
                (
                    "WalletFactory".to_string(),
                    vec![ConstructorArg::Address(wallet)]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_the_step() {
        let (_dir, store) = artifacts(&["Wallet"]);
        let plan = plan::<Devnet>(&store).unwrap();
        let mut runner = StepRunner::new("devnet", Devnet::default(), InMemoryRegistry::new(), plan);

        let failure = runner.run(DeploymentContext::new("devnet")).await.unwrap_err();

        assert!(matches!(failure.error, MigrationError::Step { step_id: 2, .. }));
        assert!(failure.context.contains(WALLET));
        assert_eq!(runner.adapter().deployed.lock().unwrap().len(), 1);
    }
}
