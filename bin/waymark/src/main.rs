//! waymark is a CLI tool to deploy and upgrade on-chain programs through ordered, resumable migrations.

mod cli;
mod migrations;
mod summary;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use waymark_migrate::{
    AddressBook, ArtifactStore, DeploymentReport, InMemoryRegistry, JsonAddressBook,
    MigrateConfig, MigrationRegistry, OnChainRegistry, RpcNetworkAdapter, RunLock, StepRunner,
};

use cli::{Cli, Command, InitRegistryArgs, MigrateArgs, OutputFormat, RegistryKind, StatusArgs};
use summary::Outcome;

const EXIT_FAILURE: u8 = 1;
const EXIT_INDETERMINATE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config_path = PathBuf::from(&cli.config);

    let result = match cli.command {
        Command::Migrate(args) => migrate(&config_path, args).await,
        Command::Status(args) => status(&config_path, args).await.map(|()| ExitCode::SUCCESS),
        Command::InitRegistry(args) => init_registry(&config_path, args)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    result.unwrap_or_else(|e| {
        let message = format!("{e:#}");
        tracing::error!(error = %message, "waymark failed");
        ExitCode::from(EXIT_FAILURE)
    })
}

async fn migrate(config_path: &Path, args: MigrateArgs) -> Result<ExitCode> {
    let config = MigrateConfig::load(config_path)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step...");
            let _ = cancel_tx.send(true);
        }
    });

    tracing::info!(
        networks = ?args.networks,
        from_step = ?args.from_step,
        registry = %args.registry,
        "Starting migrations..."
    );

    let outcomes = futures::future::join_all(args.networks.iter().map(|network| {
        let config = &config;
        let args = &args;
        let cancel = cancel_rx.clone();
        async move {
            match migrate_network(config, network, args, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(network = %network, error = %error, "Run not started");
                    Outcome::NotStarted {
                        network: network.clone(),
                        error,
                    }
                }
            }
        }
    }))
    .await;

    summary::print_outcomes(&outcomes);

    for outcome in outcomes.iter().filter(|o| o.is_indeterminate()) {
        tracing::error!(
            network = outcome.network(),
            "On-chain state may be ahead of the registry, reconcile manually before resuming"
        );
    }

    if outcomes.iter().any(Outcome::is_indeterminate) {
        Ok(ExitCode::from(EXIT_INDETERMINATE))
    } else if outcomes.iter().all(Outcome::is_success) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}

async fn migrate_network(
    config: &MigrateConfig,
    network: &str,
    args: &MigrateArgs,
    cancel: watch::Receiver<bool>,
) -> Result<Outcome> {
    let network_config = config.network(network)?;
    let _lock = RunLock::acquire(&config.outdata, network)?;

    let adapter = RpcNetworkAdapter::from_config(network_config, config)?;
    let book = JsonAddressBook::new(&config.outdata);
    let plan = migrations::plan(&ArtifactStore::new(&config.artifacts_dir))?;

    match args.registry {
        RegistryKind::OnChain => {
            let address = network_config.registry.with_context(|| {
                format!("No bookkeeping program configured for {network}, run `waymark init-registry --network {network}` first")
            })?;
            let mut registry = OnChainRegistry::new(network, address, adapter.clone())
                .with_confirmation_timeout(config.confirmation_timeout());
            if let Some(applied_by) = &network_config.applied_by {
                registry = registry.with_applied_by(applied_by);
            }
            let runner = StepRunner::new(network, adapter, registry, plan)
                .with_options(config.run_options(args.from_step))
                .with_cancellation(cancel);
            execute(runner, &book, Some(address)).await
        }
        RegistryKind::Memory => {
            tracing::warn!(network, "Using an in-memory registry, progress will not be persisted");
            let mut registry = InMemoryRegistry::new();
            if let Some(applied_by) = &network_config.applied_by {
                registry = registry.with_applied_by(applied_by);
            }
            let runner = StepRunner::new(network, adapter, registry, plan)
                .with_options(config.run_options(args.from_step))
                .with_cancellation(cancel);
            execute(runner, &book, None).await
        }
    }
}

async fn execute<R: MigrationRegistry>(
    mut runner: StepRunner<RpcNetworkAdapter, R>,
    book: &JsonAddressBook,
    registry_address: Option<alloy_core::primitives::Address>,
) -> Result<Outcome> {
    let network = runner.network().to_string();
    let context = book.restore_context(&network)?;

    match runner.run(context).await {
        Ok(run) => {
            let mut report = run.to_deployment_report();
            report.registry = registry_address;
            book.store(&report)?;
            Ok(Outcome::Migrated {
                report,
                executed: run.executed,
            })
        }
        Err(failure) => {
            let indeterminate = failure.is_indeterminate();
            let mut report = DeploymentReport::new(&network);
            report.registry = registry_address;
            report.last_completed = runner
                .registry()
                .last_completed(&network)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(network = %network, error = %e, "Could not re-read the registry");
                    None
                });
            report.deployments = failure.context.deployments().to_vec();
            report.unrecorded = failure.unrecorded;
            book.store(&report)?;

            Ok(Outcome::Failed {
                report,
                error: format!("{:#}", anyhow::Error::from(failure.error)),
                indeterminate,
            })
        }
    }
}

async fn status(config_path: &Path, args: StatusArgs) -> Result<()> {
    let config = MigrateConfig::load(config_path)?;
    let book = JsonAddressBook::new(&config.outdata);

    let networks = if args.networks.is_empty() {
        config.networks.keys().cloned().collect()
    } else {
        args.networks
    };

    let mut reports = Vec::new();
    for network in &networks {
        let network_config = config.network(network)?;
        let mut report = book
            .load(network)?
            .unwrap_or_else(|| DeploymentReport::new(network));

        if let Some(address) = network_config.registry {
            let adapter = RpcNetworkAdapter::from_config(network_config, &config)?;
            let registry = OnChainRegistry::new(network.as_str(), address, adapter);
            match registry.last_completed(network).await {
                Ok(last) => report.last_completed = last,
                Err(e) => {
                    tracing::warn!(network = %network, error = %e, "Registry unavailable, showing the address book")
                }
            }
            report.registry = Some(address);
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Table => {
            let plan = migrations::plan::<RpcNetworkAdapter>(&ArtifactStore::new(
                &config.artifacts_dir,
            ))?;
            println!("{}", summary::status_table(&reports, plan.highest()));
            println!("{}", summary::deployments_table(&reports));
        }
    }

    Ok(())
}

async fn init_registry(config_path: &Path, args: InitRegistryArgs) -> Result<()> {
    let mut config = MigrateConfig::load(config_path)?;
    let network_config = config.network(&args.network)?;

    if let (Some(existing), false) = (network_config.registry, args.force) {
        anyhow::bail!(
            "A bookkeeping program is already configured for {} at {existing}, pass --force to replace it",
            args.network
        );
    }

    let _lock = RunLock::acquire(&config.outdata, &args.network)?;
    let adapter = RpcNetworkAdapter::from_config(network_config, &config)?;
    let artifact = ArtifactStore::new(&config.artifacts_dir).require(&args.artifact)?;

    let registry = OnChainRegistry::deploy(
        args.network.as_str(),
        adapter,
        &artifact,
        config.confirmation_timeout(),
    )
    .await?;

    let address = registry.address();
    if let Some(entry) = config.networks.get_mut(&args.network) {
        entry.registry = Some(address);
    }
    config.save_to_file(config_path)?;

    println!("Bookkeeping program for {} deployed at {address}", args.network);
    Ok(())
}
