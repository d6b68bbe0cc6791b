mod cli;

use prismcast::{capture::FileSource, config, server, supervisor};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use prismcast_core::events::EventBus;
use std::sync::Arc;

/// How often the idle sweep runs.
const IDLE_SWEEP_INTERVAL_SECS: u64 = 15;

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting PrismCast");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    if config.capture.channels.is_empty() {
        tracing::warn!("no channels configured; stream requests will return 404");
    }

    let config = Arc::new(config);
    let events = Arc::new(EventBus::default());
    let supervisor = Arc::new(supervisor::Supervisor::new(
        config.clone(),
        Arc::new(FileSource),
        events.clone(),
    ));

    let sweep = supervisor::start_idle_sweep(supervisor.clone(), IDLE_SWEEP_INTERVAL_SECS);

    let result = server::start_server(config, supervisor, events).await;

    tracing::info!("Shutting down...");
    sweep.abort();
    result.map_err(Into::into)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise derive defaults from --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "prismcast=trace,prismcast_media=trace,prismcast_core=debug,tower_http=debug"
                .to_string()
        } else {
            "prismcast=debug,prismcast_media=debug,prismcast_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(host, port, cli.config.as_deref()))
        }
        Commands::Validate { file } => validate_config(file.or(cli.config).as_deref()),
        Commands::Version => {
            println!("prismcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(path) => {
            println!("Validating config: {:?}", path);
            let config = config::load_config(path)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!(
                "  HLS: {}s segments, {} segment window",
                config.hls.segment_duration, config.hls.max_segments
            );
            println!("  Channels: {}", config.capture.channels.len());
            for ch in &config.capture.channels {
                println!("    {} ({}) <- {}", ch.id, ch.name, ch.source.display());
            }
            for warning in config.validate() {
                println!("  warning: {warning}");
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!(
                "  HLS: {}s segments, {} segment window",
                config.hls.segment_duration, config.hls.max_segments
            );
        }
    }

    Ok(())
}
