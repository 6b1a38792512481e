//! registry-guard command line.
//!
//! ```text
//! registry-guard [--config FILE] validate <ID>...
//! registry-guard [--config FILE] health
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use registry_guard::config::{load_config, AppConfig};
use registry_guard::observability::{logging, metrics};
use registry_guard::resilience::AdmissionPolicy;
use registry_guard::{ServiceDeps, ValidationService};

#[derive(Parser)]
#[command(name = "registry-guard")]
#[command(about = "Validate business identifiers against the national registry", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more identifiers
    Validate {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Fail instead of waiting when the local rate limit is reached
        #[arg(long)]
        fail_fast: bool,
    },
    /// Print circuit breaker and cache health
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "registry-guard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let deps = ServiceDeps::from_config(&config).await?;
    let service = Arc::new(ValidationService::new(&config, deps)?);

    if config.cache.warm_on_startup {
        let warm = service.clone();
        tokio::spawn(async move {
            let report = warm.warm_cache().await;
            tracing::debug!(loaded = report.loaded, failed = report.failed, "Background warm-up done");
        });
    }

    let mut exit = ExitCode::SUCCESS;
    match cli.command {
        Commands::Validate { ids, fail_fast } => {
            let policy = if fail_fast {
                AdmissionPolicy::FailFast
            } else {
                config.registry.admission
            };
            for id in ids {
                let line = match service.validate_identifier_with(&id, policy).await {
                    Ok(verdict) => json!({ "input": id, "verdict": verdict }),
                    Err(e) => {
                        exit = ExitCode::FAILURE;
                        json!({
                            "input": id,
                            "error": {
                                "kind": e.kind(),
                                "transient": e.is_transient(),
                                "message": e.to_string(),
                            }
                        })
                    }
                };
                println!("{}", line);
            }
        }
        Commands::Health => {
            let report = json!({
                "summary": service.health_summary(),
                "circuits": service.get_circuit_health(),
                "cache": service.get_cache_metrics(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(exit)
}
