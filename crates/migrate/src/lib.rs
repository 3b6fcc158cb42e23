//! waymark-migrate - Ordered, resumable on-chain migrations.
//!
//! This crate runs numbered migration steps against a ledger network, binds the
//! programs each step deploys under logical names, and records progress in a
//! durable registry so an interrupted run resumes at the first step that is
//! not recorded complete.

mod error;
pub use error::{
    BindingError, ConfigurationError, DeployError, MigrationError, RegistryError, RunFailure,
};

mod deployment;
pub use deployment::{Deployment, DeploymentReport};

mod context;
pub use context::DeploymentContext;

mod artifact;
pub use artifact::{ArtifactStore, ConstructorArg, ProgramArtifact, encode_constructor_args};

mod adapter;
pub use adapter::{Confirmation, NetworkAdapter, SubmittedDeployment};

pub mod rpc;
pub use rpc::RpcNetworkAdapter;

mod registry;
pub use registry::{InMemoryRegistry, MigrationRecord, MigrationRegistry};

pub mod bookkeeping;
pub use bookkeeping::OnChainRegistry;

mod step;
pub use step::{MigrationStep, StepContext, StepPlan};

mod runner;
pub use runner::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_SUBMISSION_TIMEOUT, RunOptions, RunReport, RunnerState,
    StepRunner,
};

mod address_book;
pub use address_book::{AddressBook, JsonAddressBook};

mod lock;
pub use lock::RunLock;

mod config;
pub use config::{CONFIG_FILENAME, ENV_PREFIX, MigrateConfig, NetworkConfig};

/// Re-exported so migrations can be authored without a direct dependency.
pub use futures::future::BoxFuture;
