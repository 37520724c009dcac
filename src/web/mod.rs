//! HTTP surface of the tagger service

pub mod handlers;

use crate::rembg::BackgroundRemover;
use crate::status::DownloadStatusTracker;
use crate::tagging::Tagger;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// State shared by every handler
///
/// The model slots start empty and are filled once by bootstrap; handlers
/// observe an empty slot as "model not loaded".
#[derive(Debug, Clone)]
pub struct AppState {
    pub status: Arc<DownloadStatusTracker>,
    pub tagger: Arc<OnceCell<Tagger>>,
    pub remover: Arc<OnceCell<BackgroundRemover>>,
    pub default_threshold: f32,
}

impl AppState {
    /// State with both capabilities still unloaded
    #[must_use]
    pub fn new(status: Arc<DownloadStatusTracker>, default_threshold: f32) -> Self {
        Self {
            status,
            tagger: Arc::new(OnceCell::new()),
            remover: Arc::new(OnceCell::new()),
            default_threshold,
        }
    }

    /// Whether the tagging capability is ready
    #[must_use]
    pub fn tagger_loaded(&self) -> bool {
        self.tagger.get().is_some()
    }
}

/// Build the router
pub fn create_app(state: AppState, max_request_size: usize) -> Router {
    Router::new()
        .route("/tag", post(handlers::tag_handler))
        .route("/rmbg", post(handlers::rmbg_handler))
        .route("/download-status", get(handlers::download_status_handler))
        .route("/health", get(handlers::health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
