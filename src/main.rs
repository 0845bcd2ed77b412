//! drytime - Main Entry Point
//!
//! Local training, one-off service cycles and the scheduled service.

use clap::Parser;
use drytime::cli::{cmd_run, cmd_serve, cmd_train, cmd_verify, Cli, Commands};
use drytime::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drytime=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { samples, threshold, model, cv_splits, output } => {
            tokio::task::spawn_blocking(move || {
                cmd_train(&samples, &threshold, model, cv_splits, &output)
            })
            .await??;
        }
        Commands::Run { model } => {
            let mut config = AppConfig::from_env()?;
            if let Some(model) = model {
                config.pipeline.variant = model;
            }
            cmd_run(config).await?;
        }
        Commands::Serve { port, host, cron } => {
            let mut config = AppConfig::from_env()?;
            if let Some(port) = port {
                config.health_port = port;
            }
            if let Some(host) = host {
                config.health_host = host;
            }
            if let Some(cron) = cron {
                config.schedule_cron = cron;
            }
            cmd_serve(config).await?;
        }
        Commands::Verify { model, samples, threshold } => {
            cmd_verify(&model, &samples, &threshold)?;
        }
    }

    Ok(())
}
