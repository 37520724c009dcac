//! Configuration conversion from CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::{ServerConfig, ServerConfigBuilder};
use anyhow::{Context, Result};

/// Convert CLI arguments to a [`ServerConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the service configuration
    ///
    /// Unset flags fall back to the environment and then the defaults.
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let max_request_size = cli
            .max_upload_mb
            .checked_mul(1024 * 1024)
            .context("Maximum upload size is too large")?;

        let mut builder = Self::base(cli)
            .default_threshold(cli.threshold)
            .segmentation_model(cli.rembg_model)
            .intra_threads(cli.threads)
            .max_request_size(max_request_size);

        if let Some(dir) = &cli.model_dir {
            builder = builder.model_dir(dir);
        }
        if let Some(endpoint) = &cli.hub_endpoint {
            builder = builder.hub_endpoint(endpoint);
        }

        builder.build().map_err(anyhow::Error::from)
    }

    fn base(cli: &Cli) -> ServerConfigBuilder {
        ServerConfig::builder().host(cli.host).port(cli.port)
    }
}
