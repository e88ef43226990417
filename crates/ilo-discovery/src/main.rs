//! iLO discovery daemon and operator CLI

use clap::{Parser, Subcommand};
use ilo_discovery::{Config, DiscoveryService};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ilo-discovery")]
#[command(version, about = "HPE iLO controller discovery and liveness engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path (falls back to $ILO_DISCOVERY_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discovery engine until interrupted
    Run,

    /// Perform one scan + registration pass and print what was found
    Scan,

    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ilo_discovery={log_level},warn"))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run => run(config_path(cli.config)?).await,
        Commands::Scan => scan(config_path(cli.config)?).await,
        Commands::ExampleConfig => {
            print!("{}", Config::example_toml());
            Ok(())
        }
    }
}

fn config_path(flag: Option<String>) -> anyhow::Result<String> {
    flag.or_else(|| std::env::var(ilo_discovery::config::CONFIG_ENV_VAR).ok())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no configuration file: pass --config or set {}",
                ilo_discovery::config::CONFIG_ENV_VAR
            )
        })
}

async fn run(config_path: String) -> anyhow::Result<()> {
    info!(version = ilo_discovery::VERSION, "starting ilo-discovery");

    let config = Config::load(&config_path).await.inspect_err(|e| {
        error!(%e, "configuration rejected");
    })?;

    let service = DiscoveryService::new(config)?;
    service.run().await?;
    Ok(())
}

async fn scan(config_path: String) -> anyhow::Result<()> {
    let config = Config::load(&config_path).await?;
    let subnet = config.subnet_range()?;
    info!(%subnet, "scanning once");

    let service = DiscoveryService::new(config)?;
    let discovered = service.scan_once().await;

    if discovered.is_empty() {
        println!("No iLO controllers found on {subnet}");
        return Ok(());
    }

    println!("Found {} controller(s) on {subnet}:", discovered.len());
    for addr in discovered {
        let state = service.host_state(addr).await;
        let uuid = service
            .registry()
            .unauthenticated_snapshot()
            .into_iter()
            .find(|client| client.address == addr)
            .map(|client| client.ilo_uuid)
            .unwrap_or_else(|| "-".to_string());
        println!("  {addr:<15}  {state:?}  {uuid}");
    }

    Ok(())
}
