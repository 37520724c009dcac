//! Model file downloads from the model hub and release mirrors
//!
//! Files are streamed into `<name>.part` next to their destination and only
//! renamed into place once the body has been fully written, so a crash or a
//! dropped connection never leaves a truncated model where the loader looks.

use crate::error::{Result, TaggerError};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// HTTP downloader for model artifacts
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
}

impl ModelDownloader {
    /// Create a downloader with a per-request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TaggerError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Download one file from a hub repository into `local_dir`
    ///
    /// Returns the final local path.
    pub async fn download_hub_file(
        &self,
        endpoint: &str,
        repo_id: &str,
        file_name: &str,
        local_dir: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        validate_repo_id(repo_id)?;
        let url = hub_file_url(endpoint, repo_id, file_name);
        let local_path = local_dir.join(file_name);
        self.download_file(&url, &local_path, expected_sha256).await?;
        Ok(local_path)
    }

    /// Stream `url` into `local_path`, returning the number of bytes written
    ///
    /// When `expected_sha256` is given the partial file is verified before it
    /// is moved into place.
    ///
    /// # Errors
    /// - [`TaggerError::Acquisition`] for connection failures, non-success
    ///   statuses, interrupted bodies and checksum mismatches
    /// - [`TaggerError::Io`] when the destination cannot be written
    pub async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<u64> {
        tracing::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TaggerError::file_io_error("create directory", parent, &e))?;
        }

        let part_path = part_path(local_path);
        let result = self
            .stream_to_file(url, &part_path)
            .await
            .and_then(|downloaded| check_download(&part_path, downloaded, expected_sha256));

        match result {
            Ok(downloaded) => {
                fs::rename(&part_path, local_path).map_err(|e| {
                    TaggerError::file_io_error("move downloaded file into place", local_path, &e)
                })?;
                tracing::info!("Downloaded {} ({} bytes)", local_path.display(), downloaded);
                Ok(downloaded)
            },
            Err(e) => {
                if part_path.exists() {
                    if let Err(cleanup_err) = fs::remove_file(&part_path) {
                        tracing::warn!(
                            "Failed to remove partial download {}: {}",
                            part_path.display(),
                            cleanup_err
                        );
                    }
                }
                Err(e)
            },
        }
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TaggerError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(TaggerError::acquisition(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| TaggerError::file_io_error("create file", path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| TaggerError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| TaggerError::file_io_error("write to file", path, &e))?;

            downloaded += bytes_read as u64;
        }

        file.flush()
            .await
            .map_err(|e| TaggerError::file_io_error("flush file", path, &e))?;

        Ok(downloaded)
    }
}

/// Check a file against an optional SHA-256 hex digest
///
/// A missing digest always passes.
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| TaggerError::file_io_error("read file for verification", file_path, &e))?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual_hash = format!("{:x}", hasher.finalize());

    if actual_hash.eq_ignore_ascii_case(expected.trim()) {
        Ok(true)
    } else {
        tracing::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}

/// `{endpoint}/{repo_id}/resolve/main/{file_name}`
#[must_use]
pub fn hub_file_url(endpoint: &str, repo_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/resolve/main/{}",
        endpoint.trim_end_matches('/'),
        repo_id.trim_matches('/'),
        file_name.trim_start_matches('/')
    )
}

/// Validate an `owner/name` repository id
pub fn validate_repo_id(repo_id: &str) -> Result<()> {
    let mut parts = repo_id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(TaggerError::invalid_config(format!(
            "Invalid repository id '{repo_id}'. Expected format: owner/name"
        ))),
    }
}

/// Pass a finished `.part` file through the optional checksum
fn check_download(part_path: &Path, downloaded: u64, expected_sha256: Option<&str>) -> Result<u64> {
    if verify_file_integrity(part_path, expected_sha256)? {
        Ok(downloaded)
    } else {
        Err(TaggerError::acquisition(format!(
            "Checksum mismatch for {} after {downloaded} bytes",
            part_path.display()
        )))
    }
}

fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".part");
    local_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hub_file_url() {
        assert_eq!(
            hub_file_url(
                "https://huggingface.co",
                "SmilingWolf/wd-v1-4-convnext-tagger-v2",
                "model.onnx"
            ),
            "https://huggingface.co/SmilingWolf/wd-v1-4-convnext-tagger-v2/resolve/main/model.onnx"
        );
        assert_eq!(
            hub_file_url("http://127.0.0.1:9000/", "a/b", "selected_tags.csv"),
            "http://127.0.0.1:9000/a/b/resolve/main/selected_tags.csv"
        );
    }

    #[test]
    fn test_validate_repo_id() {
        assert!(validate_repo_id("SmilingWolf/wd-v1-4-convnext-tagger-v2").is_ok());
        assert!(validate_repo_id("").is_err());
        assert!(validate_repo_id("single-part").is_err());
        assert!(validate_repo_id("a/b/c").is_err());
        assert!(validate_repo_id("/b").is_err());
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/models/model.onnx")),
            PathBuf::from("/models/model.onnx.part")
        );
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tags.csv");
        fs::write(&file, b"hello").unwrap();

        // sha256("hello")
        let hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_file_integrity(&file, Some(hash)).unwrap());
        assert!(verify_file_integrity(&file, Some(&hash.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&file, Some("deadbeef")).unwrap());
        assert!(verify_file_integrity(&file, None).unwrap());
    }

    #[test]
    fn test_check_download() {
        let temp_dir = TempDir::new().unwrap();
        let part = temp_dir.path().join("model.onnx.part");
        fs::write(&part, b"hello").unwrap();

        assert_eq!(check_download(&part, 5, None).unwrap(), 5);
        assert!(matches!(
            check_download(&part, 5, Some("deadbeef")),
            Err(TaggerError::Acquisition(_))
        ));

        // Unreadable part file surfaces as an error instead of passing
        let missing = temp_dir.path().join("gone.part");
        assert!(check_download(&missing, 5, Some("deadbeef")).is_err());
    }

    async fn serve_bytes(body: &'static [u8]) -> std::net::SocketAddr {
        let app = axum::Router::new()
            .route("/model.onnx", axum::routing::get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_checksum_failure_removes_part_file() {
        let temp_dir = TempDir::new().unwrap();
        let addr = serve_bytes(b"hello").await;
        let downloader = ModelDownloader::new(Duration::from_secs(5)).unwrap();
        let dest = temp_dir.path().join("model.onnx");
        let url = format!("http://{addr}/model.onnx");

        let err = downloader
            .download_file(&url, &dest, Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaggerError::Acquisition(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());

        let hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let written = downloader
            .download_file(&url, &dest, Some(hash))
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_acquisition_error() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = ModelDownloader::new(Duration::from_secs(5)).unwrap();
        let dest = temp_dir.path().join("model.onnx");

        // Port 9 (discard) on loopback refuses connections
        let err = downloader
            .download_file("http://127.0.0.1:9/model.onnx", &dest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, TaggerError::Acquisition(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
