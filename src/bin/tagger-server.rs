//! NAIS tagger sidecar
//!
//! HTTP service for image tagging and background removal used by the desktop
//! application.

use nais_tagger::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
