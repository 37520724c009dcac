//! Configuration types for the tagger service

use crate::error::{Result, TaggerError};
use crate::rembg::SegmentationModel;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default tag threshold applied when a request does not carry one
pub const DEFAULT_THRESHOLD: f32 = 0.35;

/// Default port the desktop shell expects the sidecar on
pub const DEFAULT_PORT: u16 = 8002;

/// Environment variable overriding the model storage directory
pub const MODEL_DIR_ENV: &str = "NAIS_TAGGER_MODEL_DIR";

/// Environment variable overriding the model hub endpoint
pub const HUB_ENDPOINT_ENV: &str = "HF_ENDPOINT";

const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
const DEFAULT_SEGMENTATION_BASE_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// Where the classification model and its tag table come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggerModelConfig {
    /// Repository id on the model hub
    pub repo_id: String,
    /// Model weights file name inside the repository
    pub model_file: String,
    /// Tag table file name inside the repository
    pub tags_file: String,
    /// Name reported through the download status
    pub display_name: String,
    /// Square input edge length the model expects
    pub input_size: u32,
    /// Expected SHA-256 of the weights file, checked after download
    #[serde(default)]
    pub model_sha256: Option<String>,
    /// Expected SHA-256 of the tag table, checked after download
    #[serde(default)]
    pub tags_sha256: Option<String>,
}

impl Default for TaggerModelConfig {
    fn default() -> Self {
        Self {
            repo_id: "SmilingWolf/wd-v1-4-convnext-tagger-v2".to_string(),
            model_file: "model.onnx".to_string(),
            tags_file: "selected_tags.csv".to_string(),
            display_name: "WD Tagger".to_string(),
            input_size: 448,
            model_sha256: None,
            tags_sha256: None,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener address
    pub host: IpAddr,
    /// Listener port (0 picks an ephemeral port)
    pub port: u16,
    /// Directory holding downloaded model artifacts
    pub model_dir: PathBuf,
    /// Classification model source
    pub tagger: TaggerModelConfig,
    /// Threshold used when `/tag` is called without one
    pub default_threshold: f32,
    /// Base URL of the model hub
    pub hub_endpoint: String,
    /// Background removal model
    pub segmentation_model: SegmentationModel,
    /// Base URL the segmentation model file is fetched from
    pub segmentation_base_url: String,
    /// Expected SHA-256 of the segmentation model, checked after download
    #[serde(default)]
    pub segmentation_sha256: Option<String>,
    /// ONNX Runtime intra-op threads (0 = auto-detect)
    pub intra_threads: usize,
    /// Largest accepted request body in bytes
    pub max_request_size: usize,
    /// Per-request timeout for model downloads
    pub download_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            model_dir: default_model_dir(),
            tagger: TaggerModelConfig::default(),
            default_threshold: DEFAULT_THRESHOLD,
            hub_endpoint: std::env::var(HUB_ENDPOINT_ENV)
                .unwrap_or_else(|_| DEFAULT_HUB_ENDPOINT.to_string()),
            segmentation_model: SegmentationModel::default(),
            segmentation_base_url: DEFAULT_SEGMENTATION_BASE_URL.to_string(),
            segmentation_sha256: None,
            intra_threads: 0,
            max_request_size: 50 * 1024 * 1024,
            download_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Create a builder for configuration
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Socket address the listener binds to
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Local path of the classification model weights
    #[must_use]
    pub fn tagger_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.tagger.model_file)
    }

    /// Local path of the tag table side-car
    #[must_use]
    pub fn tags_path(&self) -> PathBuf {
        self.model_dir.join(&self.tagger.tags_file)
    }

    /// Local path of the segmentation model
    #[must_use]
    pub fn segmentation_model_path(&self) -> PathBuf {
        self.model_dir.join(self.segmentation_model.file_name())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.tagger.input_size == 0 {
            return Err(TaggerError::invalid_config(
                "Tagger input size must be greater than zero",
            ));
        }

        if !self.default_threshold.is_finite() || self.default_threshold < 0.0 {
            return Err(TaggerError::invalid_config(format!(
                "Default threshold must be a finite non-negative number, got {}",
                self.default_threshold
            )));
        }

        if self.tagger.repo_id.trim().is_empty()
            || self.tagger.model_file.trim().is_empty()
            || self.tagger.tags_file.trim().is_empty()
        {
            return Err(TaggerError::invalid_config(
                "Tagger repository id and file names must not be empty",
            ));
        }

        if self.hub_endpoint.trim().is_empty() || self.segmentation_base_url.trim().is_empty() {
            return Err(TaggerError::invalid_config(
                "Download endpoints must not be empty",
            ));
        }

        if self.max_request_size == 0 {
            return Err(TaggerError::invalid_config(
                "Maximum request size must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Resolve the model storage directory
///
/// Order: `NAIS_TAGGER_MODEL_DIR`, then `<data dir>/NAIS/models`
/// (`%APPDATA%\NAIS\models` on Windows), then `./models`.
#[must_use]
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(MODEL_DIR_ENV) {
        return PathBuf::from(dir);
    }

    dirs::data_dir().map_or_else(
        || PathBuf::from("models"),
        |dir| dir.join("NAIS").join("models"),
    )
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set listener host
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Set listener port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set model storage directory
    #[must_use]
    pub fn model_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    /// Set the classification model source
    #[must_use]
    pub fn tagger(mut self, tagger: TaggerModelConfig) -> Self {
        self.config.tagger = tagger;
        self
    }

    /// Set default tag threshold
    #[must_use]
    pub fn default_threshold(mut self, threshold: f32) -> Self {
        self.config.default_threshold = threshold;
        self
    }

    /// Set model hub endpoint
    #[must_use]
    pub fn hub_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.hub_endpoint = endpoint.into();
        self
    }

    /// Set background removal model
    #[must_use]
    pub fn segmentation_model(mut self, model: SegmentationModel) -> Self {
        self.config.segmentation_model = model;
        self
    }

    /// Set the base URL for the segmentation model download
    #[must_use]
    pub fn segmentation_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.segmentation_base_url = url.into();
        self
    }

    /// Require the downloaded segmentation model to match a SHA-256 digest
    #[must_use]
    pub fn segmentation_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.config.segmentation_sha256 = Some(digest.into());
        self
    }

    /// Set ONNX Runtime intra-op threads (0 = auto)
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set maximum request body size
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    /// Set download timeout
    #[must_use]
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_desktop_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8002);
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!((config.default_threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.tagger.input_size, 448);
        assert_eq!(config.tagger.model_file, "model.onnx");
        assert_eq!(config.tagger.tags_file, "selected_tags.csv");
        assert_eq!(config.segmentation_model, SegmentationModel::IsnetGeneralUse);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ServerConfig::builder()
            .port(0)
            .model_dir("/tmp/nais-models")
            .default_threshold(0.5)
            .hub_endpoint("http://127.0.0.1:9000")
            .intra_threads(2)
            .build()
            .unwrap();

        assert_eq!(config.port, 0);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/nais-models"));
        assert_eq!(config.intra_threads, 2);
        assert_eq!(
            config.tagger_model_path(),
            PathBuf::from("/tmp/nais-models/model.onnx")
        );
        assert_eq!(
            config.tags_path(),
            PathBuf::from("/tmp/nais-models/selected_tags.csv")
        );
        assert_eq!(
            config.segmentation_model_path(),
            PathBuf::from("/tmp/nais-models/isnet-general-use.onnx")
        );
    }

    #[test]
    fn test_validation_failures() {
        assert!(ServerConfig::builder()
            .default_threshold(f32::NAN)
            .build()
            .is_err());
        assert!(ServerConfig::builder()
            .default_threshold(-0.1)
            .build()
            .is_err());
        assert!(ServerConfig::builder().max_request_size(0).build().is_err());

        let tagger = TaggerModelConfig {
            input_size: 0,
            ..TaggerModelConfig::default()
        };
        let err = ServerConfig::builder().tagger(tagger).build().unwrap_err();
        assert!(err.to_string().contains("input size"));

        let tagger = TaggerModelConfig {
            repo_id: "  ".to_string(),
            ..TaggerModelConfig::default()
        };
        assert!(ServerConfig::builder().tagger(tagger).build().is_err());
    }

    #[test]
    fn test_threshold_above_one_is_allowed() {
        // Raising the threshold past 1.0 is how callers ask for "no tags"
        assert!(ServerConfig::builder()
            .default_threshold(1.01)
            .build()
            .is_ok());
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig::builder().port(9123).build().unwrap();
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:9123");
    }
}
