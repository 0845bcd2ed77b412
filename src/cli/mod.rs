//! drytime CLI Module
//!
//! Command-line interface for local training, one-off service cycles,
//! the long-running scheduled service and artifact verification.

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

use crate::config::{AppConfig, ModelVariant, PipelineConfig};
use crate::export::{read_metadata, OnnxModel};
use crate::pipeline::{PipelineOutcome, Preparation, TrainingPipeline, TrainingResult};
use crate::scheduler::{CronSchedule, Scheduler};
use crate::server::{run_server, ServerConfig};
use crate::service::Service;
use crate::training::{r2_score, rmse};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn print_result(result: &TrainingResult) {
    println!();
    kv("Message", &result.message);
    let none = || "-".to_string();
    kv("Model", &result.model_file.clone().unwrap_or_else(none));
    kv("Metadata", &result.metadata_file.clone().unwrap_or_else(none));
    kv("RMSE (cv)", &result.rmse_cv.map(|v| format!("{:.2}", v)).unwrap_or_else(none));
    kv("R² (in-sample)", &result.r2_insample.map(|v| format!("{:.3}", v)).unwrap_or_else(none));
    println!();
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "drytime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train minutes-until-dry models from irrigation sensor data")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train from local JSON files and write artifacts (no upload)
    Train {
        /// Sample payload (JSON)
        #[arg(short, long)]
        samples: PathBuf,

        /// Threshold: a number, or a JSON file holding the threshold payload
        #[arg(short, long)]
        threshold: String,

        /// Model variant (ridge, random_forest)
        #[arg(short, long, env = "MODEL_VARIANT", default_value = "ridge")]
        model: ModelVariant,

        /// Number of time-series cross-validation splits
        #[arg(long, default_value = "5")]
        cv_splits: usize,

        /// Output directory for the model and metadata
        #[arg(short, long, env = "MODELS_DIR", default_value = "./models")]
        output: PathBuf,
    },

    /// Run one fetch → train → upload cycle with environment configuration
    Run {
        /// Override MODEL_VARIANT
        #[arg(short, long)]
        model: Option<ModelVariant>,
    },

    /// Serve the health endpoint and run the training cycle on a cron schedule
    Serve {
        /// Override HEALTH_PORT
        #[arg(short, long)]
        port: Option<u16>,

        /// Override HEALTH_HOST
        #[arg(long)]
        host: Option<String>,

        /// Override SCHEDULE_CRON
        #[arg(long)]
        cron: Option<String>,
    },

    /// Score an exported model against a sample/threshold pair
    Verify {
        /// ONNX model file
        #[arg(short, long)]
        model: PathBuf,

        /// Sample payload (JSON)
        #[arg(short, long)]
        samples: PathBuf,

        /// Threshold: a number, or a JSON file holding the threshold payload
        #[arg(short, long)]
        threshold: String,
    },
}

// ─── Input loading ─────────────────────────────────────────────────────────────

pub fn load_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// A literal number, or the contents of a JSON file
pub fn load_threshold(arg: &str) -> anyhow::Result<Value> {
    if let Ok(value) = arg.trim().parse::<f64>() {
        return Ok(Value::from(value));
    }
    load_json(Path::new(arg))
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(
    samples_path: &Path,
    threshold: &str,
    variant: ModelVariant,
    cv_splits: usize,
    output: &Path,
) -> anyhow::Result<()> {
    section("Train");

    step_run("Loading payloads");
    let samples = load_json(samples_path)?;
    let threshold = load_threshold(threshold)?;
    step_done(&samples_path.display().to_string());

    let mut config = PipelineConfig::new(variant).with_models_dir(output);
    config.search = config.search.with_n_splits(cv_splits);

    step_run(&format!("Training {}", variant.to_string().cyan()));
    let start = Instant::now();
    let outcome = TrainingPipeline::new(config).run(&samples, &threshold)?;
    step_done(&format!("{:?}", start.elapsed()));

    if let PipelineOutcome::Trained(run) = &outcome {
        if let Some(adjustment) = run.threshold_adjustment {
            println!(
                "  {} threshold {} adjusted to {:.2}",
                "!".yellow(),
                adjustment.requested,
                adjustment.applied
            );
        }
        println!(
            "  {} exported graph within {:.2e} of the pipeline",
            "✓".green(),
            run.artifact.verification.max_abs_diff
        );
    }
    print_result(&TrainingResult::from(&outcome));
    Ok(())
}

pub async fn cmd_run(config: AppConfig) -> anyhow::Result<()> {
    section("Run");
    let service = Service::from_config(&config)?;
    let result = service.run_once().await?;
    print_result(&result);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for ctrl+c, running until killed");
        std::future::pending::<()>().await;
    }
}

pub async fn cmd_serve(config: AppConfig) -> anyhow::Result<()> {
    let schedule: CronSchedule = config.schedule_cron.parse()?;
    let service = Service::from_config(&config)?;
    let scheduler = Scheduler::new(schedule);

    section("Serve");
    kv("Health", &format!("http://{}:{}/api/health", config.health_host, config.health_port));
    kv("Schedule", &scheduler.schedule().to_string());
    kv("Variant", &config.pipeline.variant.to_string());
    println!();

    let server = run_server(ServerConfig::from(&config), shutdown_signal());
    let jobs = scheduler.run(|| {
        let service = service.clone();
        async move {
            service.run_logged().await;
        }
    });

    tokio::select! {
        res = server => res?,
        res = jobs => res?,
    }
    Ok(())
}

pub fn cmd_verify(model_path: &Path, samples_path: &Path, threshold: &str) -> anyhow::Result<()> {
    section("Verify");

    step_run("Decoding model");
    let model = OnnxModel::from_bytes(&std::fs::read(model_path)?)?;
    step_done(&format!("{} features", model.n_features()));

    let metadata_path = model_path.with_extension("metadata.json");
    if metadata_path.exists() {
        let metadata = read_metadata(&metadata_path)?;
        kv("Model type", &metadata.model_type);
        kv("Trained at", &metadata.training_timestamp_utc.to_rfc3339());
        kv("RMSE (cv)", &format!("{:.2}", metadata.rmse_cv));
    } else if let Some(kind) = model.metadata().get("model_type") {
        kv("Model type", kind);
    }

    step_run("Preparing samples");
    let samples = load_json(samples_path)?;
    let threshold = load_threshold(threshold)?;
    let data = match TrainingPipeline::default().prepare(&samples, &threshold)? {
        Preparation::Ready(data) => data,
        Preparation::NoData(reason) => {
            println!("{}", "no data".yellow());
            println!("  {}", reason.message());
            return Ok(());
        }
    };
    step_done(&format!("{} labelled rows", data.features.n_samples()));

    let predictions = model.predict(&data.features.x)?;
    println!();
    kv("Rows", &data.features.n_samples().to_string());
    kv("RMSE", &format!("{:.2}", rmse(&data.features.y, &predictions)));
    kv("R²", &format!("{:.3}", r2_score(&data.features.y, &predictions)));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_args() {
        let cli = Cli::try_parse_from([
            "drytime", "train", "-s", "samples.json", "-t", "30", "-m", "rf",
        ])
        .unwrap();
        match cli.command {
            Commands::Train { model, cv_splits, threshold, .. } => {
                assert_eq!(model, ModelVariant::RandomForest);
                assert_eq!(cv_splits, 5);
                assert_eq!(threshold, "30");
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_threshold_literal() {
        assert_eq!(load_threshold("42.5").unwrap(), serde_json::json!(42.5));
        assert!(load_threshold("/nonexistent/threshold.json").is_err());
    }
}
