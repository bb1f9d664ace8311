mod author;
mod migrate;
mod selector;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modkit_rls::RlsConfig;
use tracing_subscriber::EnvFilter;

/// Row-level security policy tooling
#[derive(Parser)]
#[command(name = "rls-cli")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the RLS configuration file (YAML); `RLS__*` env vars override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Author a policy migration for an app and append it to the ledger
    AddPolicies(author::AddPoliciesArgs),
    /// Print the forward or backward SQL of a ledger step
    Sql(migrate::SqlArgs),
    /// Apply all pending ledger steps
    Apply(migrate::DbArgs),
    /// Revert the most recently applied ledger step
    Revert(migrate::DbArgs),
    /// Validate configuration and exit
    Check,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<RlsConfig> {
    let config = RlsConfig::load(path).context("failed to load RLS configuration")?;
    config.validate().context("invalid RLS configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(
        fields = ?config.enforced_fields,
        prefix = %config.session_namespace_prefix,
        "Configuration loaded"
    );

    match cli.command {
        Commands::AddPolicies(args) => args.run(&config),
        Commands::Sql(args) => args.run(),
        Commands::Apply(args) => args.apply(&config).await,
        Commands::Revert(args) => args.revert(&config).await,
        Commands::Check => check(&config),
    }
}

fn check(config: &RlsConfig) -> Result<()> {
    let fields = config.enforced_field_set()?;
    println!("Configuration is valid");
    println!("  enforced fields: {}", fields.fields().join(", "));
    println!("  tenant apps:     {}", config.tenant_apps.join(", "));
    println!("  namespace:       {}", fields.namespace_prefix());
    println!(
        "  migration user:  {}",
        if config.use_migration_user {
            config.migration_user.as_deref().unwrap_or_default()
        } else {
            "(runtime role)"
        }
    );
    Ok(())
}
