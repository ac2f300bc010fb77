mod app;
mod cli;
mod collector;
mod config;
mod error;
mod identity;
mod logging;
mod metrics;
mod runtime;
mod shutdown;
mod sink;

use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match &cli.command {
        Some(cli::Commands::Version) => {
            println!("dockpulse v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(cli::Commands::Validate { config }) => {
            logging::init(&cli)?;

            let path = config.as_ref().unwrap_or(&cli.config);
            match config::load(path) {
                Ok(_) => {
                    println!("Configuration OK: {}", path.display());
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("Invalid configuration {}: {}", path.display(), e);
                    std::process::exit(1);
                }
            }
        }
        _ => {}
    }

    logging::init(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dockpulse");

    let config = config::load(&cli.config)?;

    info!(
        interval = %config.collector.interval,
        sink = ?config.sink.sink_type,
        "Configuration loaded"
    );

    match cli.command {
        Some(cli::Commands::Once) => {
            let report = app::run_once(config).await?;
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        _ => app::run(config).await,
    }
}
