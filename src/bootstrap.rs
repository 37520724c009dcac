//! First-run model acquisition and loading
//!
//! Each capability is acquired then loaded independently: the classifier with
//! its tag table, and the segmentation model. Acquisition reports staged
//! progress through the shared [`DownloadStatusTracker`] and always returns
//! the tracker to idle afterwards, whether the fetch succeeded or not.

use crate::backends::onnx::{OnnxClassifier, OnnxSegmenter};
use crate::config::ServerConfig;
use crate::download::ModelDownloader;
use crate::error::{Result, TaggerError};
use crate::inference::InferenceEngine;
use crate::rembg::BackgroundRemover;
use crate::status::DownloadStatusTracker;
use crate::tagging::Tagger;
use crate::tags::TagTable;
use crate::tracing_config::spans;
use once_cell::sync::OnceCell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Status name used while the segmentation model is fetched
pub const SEGMENTATION_DISPLAY_NAME: &str = "Background Removal";

/// Both capabilities, fully loaded
#[derive(Debug)]
pub struct ReadyModels {
    pub tagger: Tagger,
    pub remover: BackgroundRemover,
}

/// Acquires and loads the models named by a [`ServerConfig`]
#[derive(Debug)]
pub struct ModelBootstrapper {
    config: ServerConfig,
    status: Arc<DownloadStatusTracker>,
    downloader: ModelDownloader,
}

impl ModelBootstrapper {
    /// Create a bootstrapper reporting into `status`
    pub fn new(config: ServerConfig, status: Arc<DownloadStatusTracker>) -> Result<Self> {
        let downloader =
            ModelDownloader::new(Duration::from_secs(config.download_timeout_secs))?;
        Ok(Self {
            config,
            status,
            downloader,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Acquire and load both capabilities, tagger first
    ///
    /// # Errors
    /// - [`TaggerError::Acquisition`] when a file is missing locally and the
    ///   fetch fails
    /// - [`TaggerError::Load`] when a local file is present but unusable
    pub async fn ensure_ready(&self) -> Result<ReadyModels> {
        let tagger = self.ensure_tagger().await?;
        let remover = self.ensure_background_remover().await?;
        Ok(ReadyModels { tagger, remover })
    }

    /// Bootstrap each capability into its slot
    ///
    /// A failure leaves only that capability unloaded; it is logged and the
    /// other capability is still attempted.
    pub async fn bootstrap_into(
        &self,
        tagger_slot: &OnceCell<Tagger>,
        remover_slot: &OnceCell<BackgroundRemover>,
    ) {
        let start = Instant::now();

        match self
            .ensure_tagger()
            .instrument(spans::bootstrap("tagger"))
            .await
        {
            Ok(tagger) => {
                if tagger_slot.set(tagger).is_err() {
                    tracing::warn!("Tagger was already loaded, keeping the existing instance");
                }
            },
            Err(e) => tracing::error!("Tagger unavailable: {}", e),
        }

        match self
            .ensure_background_remover()
            .instrument(spans::bootstrap("background_removal"))
            .await
        {
            Ok(remover) => {
                if remover_slot.set(remover).is_err() {
                    tracing::warn!(
                        "Background remover was already loaded, keeping the existing instance"
                    );
                }
            },
            Err(e) => tracing::error!("Background remover unavailable: {}", e),
        }

        tracing::info!(
            tagger = tagger_slot.get().is_some(),
            background_removal = remover_slot.get().is_some(),
            "Bootstrap finished in {:.1}s",
            start.elapsed().as_secs_f64()
        );
    }

    /// Acquire the classifier files and load the tagger
    pub async fn ensure_tagger(&self) -> Result<Tagger> {
        self.acquire_tagger_files().await?;
        self.load_tagger().await
    }

    /// Acquire the segmentation model and load the background remover
    pub async fn ensure_background_remover(&self) -> Result<BackgroundRemover> {
        self.acquire_segmentation_model().await?;
        self.load_background_remover().await
    }

    /// Make sure the model weights and the tag table exist locally
    ///
    /// If either is missing, both are fetched from the hub.
    pub async fn acquire_tagger_files(&self) -> Result<(PathBuf, PathBuf)> {
        self.create_model_dir()?;

        let model_path = self.config.tagger_model_path();
        let tags_path = self.config.tags_path();
        if model_path.exists() && tags_path.exists() {
            tracing::debug!("Tagger files present in {}", self.config.model_dir.display());
            return Ok((model_path, tags_path));
        }

        let tagger = &self.config.tagger;
        tracing::info!(
            "Tagger files not found, downloading {} from {}",
            tagger.repo_id,
            self.config.hub_endpoint
        );

        let name = tagger.display_name.as_str();
        self.status
            .update(name, 0, 100, &format!("Downloading {name} model..."));

        let result = async {
            let model_path = self
                .downloader
                .download_hub_file(
                    &self.config.hub_endpoint,
                    &tagger.repo_id,
                    &tagger.model_file,
                    &self.config.model_dir,
                    tagger.model_sha256.as_deref(),
                )
                .await?;

            self.status.update(name, 50, 100, "Downloading tags file...");

            let tags_path = self
                .downloader
                .download_hub_file(
                    &self.config.hub_endpoint,
                    &tagger.repo_id,
                    &tagger.tags_file,
                    &self.config.model_dir,
                    tagger.tags_sha256.as_deref(),
                )
                .await?;

            self.status.update(name, 100, 100, "Download complete");
            Ok::<_, TaggerError>((model_path, tags_path))
        }
        .await;

        self.status.reset();

        if let Err(e) = &result {
            tracing::error!("Failed to download tagger files: {}", e);
        }
        result
    }

    /// Make sure the segmentation model exists locally
    pub async fn acquire_segmentation_model(&self) -> Result<PathBuf> {
        self.create_model_dir()?;

        let model = self.config.segmentation_model;
        let model_path = self.config.segmentation_model_path();
        if model_path.exists() {
            tracing::debug!("Segmentation model present at {}", model_path.display());
            return Ok(model_path);
        }

        let url = model.url(&self.config.segmentation_base_url);
        tracing::info!("Segmentation model not found, downloading {}", url);

        self.status.update(
            SEGMENTATION_DISPLAY_NAME,
            0,
            100,
            &format!("Downloading {model} model..."),
        );

        let result = self
            .downloader
            .download_file(
                &url,
                &model_path,
                self.config.segmentation_sha256.as_deref(),
            )
            .await;
        if result.is_ok() {
            self.status
                .update(SEGMENTATION_DISPLAY_NAME, 100, 100, "Download complete");
        }

        self.status.reset();

        match result {
            Ok(_) => Ok(model_path),
            Err(e) => {
                tracing::error!("Failed to download segmentation model: {}", e);
                Err(e)
            },
        }
    }

    /// Load the classifier and tag table from the model directory
    pub async fn load_tagger(&self) -> Result<Tagger> {
        let model_path = self.config.tagger_model_path();
        let tags_path = self.config.tags_path();
        let input_size = self.config.tagger.input_size;
        let threads = self.config.intra_threads;

        tokio::task::spawn_blocking(move || -> Result<Tagger> {
            let classifier = OnnxClassifier::from_file(&model_path, threads)?;
            let tags = TagTable::from_csv_file(&tags_path)?;
            tracing::info!("Loaded {} tags from {}", tags.len(), tags_path.display());
            Ok(Tagger::new(
                InferenceEngine::new(Box::new(classifier)),
                tags,
                input_size,
            ))
        })
        .await
        .map_err(|e| TaggerError::internal(format!("Tagger loading task failed: {e}")))?
    }

    /// Load the segmentation model from the model directory
    pub async fn load_background_remover(&self) -> Result<BackgroundRemover> {
        let model = self.config.segmentation_model;
        let model_path = self.config.segmentation_model_path();
        let threads = self.config.intra_threads;

        tokio::task::spawn_blocking(move || -> Result<BackgroundRemover> {
            let segmenter = OnnxSegmenter::from_file(&model_path, threads)?;
            Ok(BackgroundRemover::new(Box::new(segmenter), model))
        })
        .await
        .map_err(|e| TaggerError::internal(format!("Remover loading task failed: {e}")))?
    }

    fn create_model_dir(&self) -> Result<()> {
        let dir = &self.config.model_dir;
        fs::create_dir_all(dir)
            .map_err(|e| TaggerError::file_io_error("create model directory", dir, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DownloadStatus;
    use tempfile::TempDir;

    fn bootstrapper(dir: &TempDir) -> (ModelBootstrapper, Arc<DownloadStatusTracker>) {
        let config = ServerConfig::builder()
            .model_dir(dir.path().join("models"))
            .hub_endpoint("http://127.0.0.1:9")
            .segmentation_base_url("http://127.0.0.1:9/releases")
            .download_timeout_secs(5)
            .build()
            .unwrap();
        let status = Arc::new(DownloadStatusTracker::new());
        (
            ModelBootstrapper::new(config, Arc::clone(&status)).unwrap(),
            status,
        )
    }

    #[tokio::test]
    async fn test_present_files_skip_download() {
        let dir = TempDir::new().unwrap();
        let (bootstrapper, status) = bootstrapper(&dir);
        let models = dir.path().join("models");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("model.onnx"), b"weights").unwrap();
        fs::write(models.join("selected_tags.csv"), "tag_id,name,category,count\n").unwrap();

        let (model, tags) = bootstrapper.acquire_tagger_files().await.unwrap();
        assert_eq!(model, models.join("model.onnx"));
        assert_eq!(tags, models.join("selected_tags.csv"));
        assert_eq!(status.snapshot(), DownloadStatus::idle());
    }

    #[tokio::test]
    async fn test_failed_fetch_resets_status_and_creates_dir() {
        let dir = TempDir::new().unwrap();
        let (bootstrapper, status) = bootstrapper(&dir);

        let err = bootstrapper.acquire_tagger_files().await.unwrap_err();
        assert!(matches!(err, TaggerError::Acquisition(_)));
        assert!(dir.path().join("models").is_dir());
        assert_eq!(status.snapshot(), DownloadStatus::idle());

        let err = bootstrapper.acquire_segmentation_model().await.unwrap_err();
        assert!(matches!(err, TaggerError::Acquisition(_)));
        assert_eq!(status.snapshot(), DownloadStatus::idle());
    }

    #[tokio::test]
    async fn test_corrupt_local_model_is_load_error() {
        let dir = TempDir::new().unwrap();
        let (bootstrapper, _) = bootstrapper(&dir);
        let models = dir.path().join("models");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("model.onnx"), b"junk").unwrap();
        fs::write(models.join("selected_tags.csv"), "tag_id,name,category,count\n1,a,0,1\n").unwrap();
        fs::write(models.join("isnet-general-use.onnx"), b"junk").unwrap();

        assert!(matches!(
            bootstrapper.ensure_tagger().await,
            Err(TaggerError::Load(_))
        ));
        assert!(matches!(
            bootstrapper.ensure_background_remover().await,
            Err(TaggerError::Load(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_into_leaves_failed_slots_empty() {
        let dir = TempDir::new().unwrap();
        let (bootstrapper, status) = bootstrapper(&dir);
        let tagger = OnceCell::new();
        let remover = OnceCell::new();

        bootstrapper.bootstrap_into(&tagger, &remover).await;

        assert!(tagger.get().is_none());
        assert!(remover.get().is_none());
        assert_eq!(status.snapshot(), DownloadStatus::idle());
    }
}
