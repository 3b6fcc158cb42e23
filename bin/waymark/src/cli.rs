use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use waymark_migrate::CONFIG_FILENAME;

/// Where completion records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RegistryKind {
    /// The bookkeeping program deployed on the target network.
    OnChain,
    /// A process-local registry. Nothing survives the run.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "waymark")]
#[command(author, version, about = "Run ordered, resumable on-chain migrations")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "WAYMARK_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    #[arg(short, long, alias = "conf", env = "WAYMARK_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute every pending migration step on the given networks.
    Migrate(MigrateArgs),
    /// Show the registry frontier and known deployments of the given networks.
    Status(StatusArgs),
    /// Deploy the bookkeeping program and store its address in the configuration file.
    InitRegistry(InitRegistryArgs),
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Networks to migrate. Each one runs independently.
    #[arg(short, long = "network", required = true)]
    pub networks: Vec<String>,

    /// Re-run from this step id. Must not be past the first pending step.
    #[arg(long = "from")]
    pub from_step: Option<u64>,

    /// Where completion records are kept.
    #[arg(long, env = "WAYMARK_REGISTRY", default_value_t = RegistryKind::OnChain)]
    pub registry: RegistryKind,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Networks to inspect. Defaults to every configured network.
    #[arg(short, long = "network")]
    pub networks: Vec<String>,

    #[arg(long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Args)]
pub struct InitRegistryArgs {
    /// Network to deploy the bookkeeping program on.
    #[arg(short, long)]
    pub network: String,

    /// Artifact of the bookkeeping program.
    #[arg(long, default_value = "Migrations")]
    pub artifact: String,

    /// Deploy a new program even if one is already configured.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from([
            "waymark", "migrate", "-n", "sepolia", "-n", "devnet", "--from", "2", "--registry",
            "memory",
        ])
        .unwrap();

        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.networks, vec!["sepolia", "devnet"]);
        assert_eq!(args.from_step, Some(2));
        assert_eq!(args.registry, RegistryKind::Memory);
    }

    #[test]
    fn test_migrate_requires_a_network() {
        assert!(Cli::try_parse_from(["waymark", "migrate"]).is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RegistryKind::OnChain.to_string(), "on-chain");
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }
}
