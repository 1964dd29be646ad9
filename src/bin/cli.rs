//! CLI entrypoint for `kokoro-serve`.
//!
//! Subcommands are limited to the set `spec.md` §6.4 names: start the
//! service, print the capability probe, print the effective configuration,
//! run a canonical warm-up inference against each configured backend, and
//! clear the downloaded model/compiled-graph cache.

use clap::{Parser, Subcommand};
use kokoro_serve::config::ServeConfig;
use kokoro_serve::error::BackendId;
use kokoro_serve::{TtsService, capability};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Low-latency text-to-speech serving engine wrapping a Kokoro-82M-class
/// ONNX acoustic model.
#[derive(Parser)]
#[command(name = "kokoro-serve", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Defaults to the platform config
    /// directory if omitted (see `kokoro_serve::paths::config_file`).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run. Defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start the HTTP serving engine (the default command).
    Serve,

    /// Probe hardware capabilities and print the result as JSON.
    Probe,

    /// Print the effective configuration (file + environment merged and
    /// validated) as TOML.
    Config,

    /// Run a canonical warm-up inference against every backend the probed
    /// capabilities and configured `backend` policy would route to.
    Warm,

    /// Remove the downloaded model asset cache and any compiled-graph
    /// caches written by the ONNX runtime.
    ClearCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("kokoro_serve=info,ort=warn,hf_hub=warn,tokenizers=warn")
        }))
        .init();

    let cli = Cli::parse();
    let config = ServeConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Probe => probe(),
        Command::Config => print_config(&config),
        Command::Warm => warm(config).await,
        Command::ClearCache => clear_cache(config),
    }
}

async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr.clone();
    info!(%bind_addr, "starting kokoro-serve");

    let service = std::sync::Arc::new(TtsService::new(config).await?);
    let app = kokoro_serve::api::router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "listening");

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn probe() -> anyhow::Result<()> {
    let capabilities = capability::detect();
    println!("{}", serde_json::to_string_pretty(&capabilities)?);
    Ok(())
}

fn print_config(config: &ServeConfig) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn warm(config: ServeConfig) -> anyhow::Result<()> {
    let capabilities = capability::detect();
    let service = TtsService::new(config).await?;

    let mut candidates = Vec::with_capacity(3);
    if capabilities.has_ane {
        candidates.push(BackendId::Ane);
    }
    if capabilities.has_gpu {
        candidates.push(BackendId::Gpu);
    }
    candidates.push(BackendId::Cpu);

    for backend_id in candidates {
        print!("warming {backend_id}... ");
        match service.session_manager.acquire_specific(backend_id).await {
            Ok(_guard) => println!("ready"),
            Err(e) => {
                error!(backend = %backend_id, error = %e, "warm-up failed");
                println!("failed: {e}");
            }
        }
    }

    Ok(())
}

fn clear_cache(config: ServeConfig) -> anyhow::Result<()> {
    let manager = kokoro_serve::models::ModelManager::new(
        kokoro_serve::paths::cache_dir().join("models"),
    )?;
    manager.clear_cache()?;
    println!(
        "cleared model cache for variant {:?} at {}",
        config.model.variant,
        manager.cache_dir().display()
    );
    Ok(())
}
