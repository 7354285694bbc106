//! model-worker CLI entry point (C8).

use clap::Parser;
use model_worker::{HandlerRegistry, ServiceManager, Worker, WorkerConfig};
use tracing_subscriber::EnvFilter;

/// model-worker - single-handler model inference worker
#[derive(Parser, Debug)]
#[command(name = "model-worker")]
#[command(about = "Hosts one inference handler behind a Unix domain socket")]
#[command(version)]
struct Cli {
    /// Path of the Unix domain socket to bind and listen on.
    socket_name: String,
}

fn main() {
    let config = WorkerConfig::from_env();
    init_logging(config.log_format);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("Incomplete data provided: Model worker expects \"socket name\"");
            std::process::exit(1);
        }
    };

    tracing::debug!(socket = %cli.socket_name, "starting model worker");

    let registry = HandlerRegistry::with_builtins();
    let services = ServiceManager::new(registry);

    let worker = match Worker::bind(&cli.socket_name, services, config) {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, "failed to start worker");
            eprintln!("Error: {}", e);
            std::process::exit(e.code().as_i32());
        }
    };

    std::process::exit(worker.run());
}

/// Initialize the tracing subscriber, formatted as human-readable text or as
/// JSON lines depending on the resolved [`WorkerConfig`].
fn init_logging(format: model_worker::config::LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("model_worker=info"));

    match format {
        model_worker::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        model_worker::config::LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
}
