//! Tagger sidecar entry point
//!
//! Starts the HTTP service on the configured port and bootstraps the models
//! in the background. Ctrl-C shuts the listener down gracefully.

use super::config::CliConfigBuilder;
use crate::bootstrap::ModelBootstrapper;
use crate::rembg::SegmentationModel;
use crate::service::TaggerService;
use crate::status::DownloadStatusTracker;
use crate::tracing_config::init_cli_tracing;
use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Image tagging and background removal sidecar
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "tagger-server")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::config::DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding downloaded models [env: NAIS_TAGGER_MODEL_DIR]
    #[arg(long, value_name = "PATH")]
    pub model_dir: Option<PathBuf>,

    /// Default tag threshold for requests that do not pass one
    #[arg(long, default_value_t = crate::config::DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Background removal model (isnet-general-use, u2net, u2netp, silueta)
    #[arg(long, default_value = "isnet-general-use")]
    pub rembg_model: SegmentationModel,

    /// ONNX Runtime intra-op threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Model hub endpoint [env: HF_ENDPOINT]
    #[arg(long, value_name = "URL")]
    pub hub_endpoint: Option<String>,

    /// Maximum upload size in megabytes
    #[arg(long, default_value_t = 50)]
    pub max_upload_mb: usize,

    /// Download the models into the model directory and exit
    #[arg(long)]
    pub only_download: bool,

    /// Print the resolved model directory and exit
    #[arg(long)]
    pub show_model_dir: bool,

    /// Disable ANSI colors in log output
    #[arg(long)]
    pub plain_logs: bool,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.plain_logs).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Invalid configuration")?;

    if cli.show_model_dir {
        println!("{}", config.model_dir.display());
        return Ok(());
    }

    if cli.only_download {
        let bootstrapper =
            ModelBootstrapper::new(config, Arc::new(DownloadStatusTracker::new()))?;
        bootstrapper
            .acquire_tagger_files()
            .await
            .context("Failed to download tagger model")?;
        bootstrapper
            .acquire_segmentation_model()
            .await
            .context("Failed to download background removal model")?;
        info!(
            "Models available in {}",
            bootstrapper.config().model_dir.display()
        );
        return Ok(());
    }

    info!("Model directory: {}", config.model_dir.display());
    info!(
        "Tagger: {} (threshold {}), background removal: {}",
        config.tagger.repo_id, config.default_threshold, config.segmentation_model
    );

    let mut service = TaggerService::new(config).context("Failed to create service")?;
    service.start().await.context("Failed to start service")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    service.stop().await;
    Ok(())
}
