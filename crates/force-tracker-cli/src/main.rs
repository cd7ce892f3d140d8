//! Force tracker CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use force_tracker_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay(args) => {
            force_tracker_cli::replay::execute(args).await?;
        }
        Commands::Version => {
            println!("forcetrack {}", env!("CARGO_PKG_VERSION"));
            println!("force-tracker library version: {}", force_tracker::VERSION);
        }
    }

    Ok(())
}
