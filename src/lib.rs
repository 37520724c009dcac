#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # NAIS Tagger
//!
//! Local HTTP sidecar that tags anime-style illustrations with a WD14-style
//! multi-label classifier and strips image backgrounds with a salient-object
//! segmentation model. Both models run on ONNX Runtime (CPU).
//!
//! On first run the models are downloaded into the model directory while the
//! service is already listening, so the desktop UI can poll
//! `GET /download-status` for progress.
//!
//! ## Endpoints
//!
//! - `POST /tag?threshold=0.35` with multipart field `file`
//! - `POST /rmbg` with multipart field `image`, answers `image/png`
//! - `GET /download-status`
//! - `GET /health`
//!
//! ## Library usage
//!
//! ```rust,no_run
//! use nais_tagger::{ServerConfig, TaggerService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder().port(8002).build()?;
//! let mut service = TaggerService::new(config)?;
//! let addr = service.start().await?;
//! println!("listening on {addr}");
//! # service.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): the `tagger-server` binary and its tracing subscriber
//! - `webp-support` (default): WebP uploads

pub mod backends;
pub mod bootstrap;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod rembg;
pub mod service;
pub mod status;
pub mod tagging;
pub mod tags;
pub mod tracing_config;
pub mod utils;
pub mod web;

pub use backends::{MockClassifier, MockSegmenter, OnnxClassifier, OnnxSegmenter};
pub use bootstrap::{ModelBootstrapper, ReadyModels};
pub use config::{ServerConfig, ServerConfigBuilder, TaggerModelConfig};
pub use download::ModelDownloader;
pub use error::{Result, TaggerError};
pub use inference::{ClassifierBackend, InferenceEngine, SegmentationBackend};
pub use rembg::{BackgroundRemover, SegmentationModel};
pub use service::TaggerService;
pub use status::{DownloadStatus, DownloadStatusTracker};
pub use tagging::{aggregate, TagResult, Tagger};
pub use tags::{TagEntry, TagTable};
pub use utils::ImagePreprocessor;
pub use web::{create_app, AppState};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{TracingConfig, TracingFormat};
