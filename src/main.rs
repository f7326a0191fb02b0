use clap::Parser;
use ladderbot::cli::{self, Cli, Commands, OutputMode};
use ladderbot::config::AppConfig;
use tracing::debug;

mod main_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_json_flag(cli.json);
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::Plan { price } => {
            main_runtime::init_logging_simple();
            debug!("Loaded config from {}", cli.config.display());
            cli::show_plan(&config, price, mode)?;
        }
        Commands::Bans { journal } => {
            main_runtime::init_logging(&config.logging);
            cli::show_bans(&config, journal, mode).await?;
        }
    }

    Ok(())
}
