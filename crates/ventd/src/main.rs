use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ventd::Config;
use ventd::Engine;

#[derive(Parser)]
#[command(version, about = "Telemetry reducer and vent controller daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "ventd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    // Initialize tracing/logging, with per-module overrides from the config
    let mut filter = Targets::new().with_default(LevelFilter::from(config.logging.level));
    for (target, level) in &config.logging.overrides {
        filter = filter.with_target(target.clone(), LevelFilter::from(*level));
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("ventd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    if config.telemetry.is_none() && config.servo.is_none() {
        tracing::warn!("No telemetry channel or vent controller configured");
    }

    // Create the engine and register whatever the config enables
    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config)?;
    let engine = Arc::new(engine);

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                tracing::error!("Engine exited with error: {}", e);
            }
        })
    };

    // Start the HTTP API unless it is disabled
    let api = if config.api.enabled {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let bind = config.api.bind.clone();
        let api_engine = engine.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = ventd::api::serve(bind, api_engine, shutdown_rx).await {
                tracing::error!("HTTP API server error: {}", e);
            }
        });
        Some((shutdown_tx, handle))
    } else {
        tracing::info!("HTTP API is disabled");
        None
    };

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Shut the API down gracefully before tearing the engine down
    if let Some((shutdown_tx, handle)) = api {
        let _ = shutdown_tx.send(());
        if let Err(e) = handle.await {
            tracing::error!("HTTP API server task failed: {}", e);
        }
    }

    engine_task.abort();

    tracing::info!("ventd shutdown complete");

    Ok(())
}
