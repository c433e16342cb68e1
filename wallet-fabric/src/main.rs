/// Wallet fabric service
///
/// Loads configuration from the environment, connects the document store,
/// secret manager and chain RPC, then serves the HTTP API or runs the
/// one-shot generate job.
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;

use wallet_fabric_lib::api::run_server;
use wallet_fabric_lib::{FabricConfig, FabricContext, WalletFabric};

#[derive(Parser)]
#[command(name = "wallet-fabric")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Generate random wallets, each bundled with HD shadow wallets, and exit
    Generate(GenerateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Random base wallets to create
    #[arg(short, long, env = "COUNT", default_value_t = 1000)]
    count: u64,

    /// HD wallets minted next to each base wallet
    #[arg(short, long, env = "SHADOWS_PER_WALLET", default_value_t = 0)]
    shadows: u64,

    /// Label for every record (defaults to WALLET_LABEL)
    #[arg(short, long)]
    label: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    log::info!("Starting wallet fabric...");

    let config = FabricConfig::from_env().context("Failed to load configuration")?;
    let bind_addr = config.bind_addr;

    log::info!(
        "Environment {:?}, chain '{}', lineage '{}', key escrow {}",
        config.environment,
        config.chain,
        config.lineage_id,
        if config.store_private_keys { "on" } else { "off" }
    );

    let context = FabricContext::from_config(config)
        .await
        .context("Failed to initialise fabric backends")?;
    let fabric = WalletFabric::new(Arc::new(context));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            run_server(fabric, bind_addr).await.context("Server error")?;
        }
        Commands::Generate(args) => {
            let result = fabric
                .run_generate_job(args.count, args.label.as_deref(), args.shadows)
                .await
                .context("Generate job failed")?;
            log::info!(
                "Generated base wallets: {} (shadow wallets: {})",
                result.created,
                result.shadows
            );
        }
    }

    Ok(())
}
