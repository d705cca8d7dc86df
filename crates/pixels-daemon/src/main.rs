//! Pixels Daemon - Main entry point
//!
//! Runs the connection scheduler and serves the REST API and event stream.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use pixels_core::Library;
use pixels_dataset::{compile_profile, DataSetView};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pixelsd")]
#[command(about = "Pixels dice host daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pixelsd.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Compile one profile, print its DataSet as JSON and exit
    #[arg(long, value_name = "UUID")]
    compile: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("pixelsd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    if let Some(profile) = args.compile {
        let library = Library::load_or_create(&config.library.path)?;
        let dataset = compile_profile(&profile, &library, &config.compiler)?;
        let view = DataSetView::parse(&dataset.bytes)?;
        let output = serde_json::json!({
            "profile": dataset.profile,
            "hash": dataset.hash,
            "size": dataset.len(),
            "remote_actions": dataset.remote_actions,
            "records": view.dump(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    info!(
        bind = %config.daemon.bind,
        max_connections = config.scheduler.max_connections,
        library = %config.library.path.display(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone()).await?;
    server::run(state, &config.daemon.bind).await
}
