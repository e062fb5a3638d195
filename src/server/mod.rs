//! HTTP serving layer.
//!
//! All handlers share one [`AppContext`] built at startup and torn down when
//! the server stops.

mod error;
mod routes;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::speakers::SpeakerProfile;
use crate::synthesis::Synthesizer;
use crate::TtsError;

pub use error::{ApiError, StatusMessage};

/// Largest accepted request body (reference clips are uploaded whole).
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// State shared by every request handler.
pub struct AppContext {
    synthesizer: Synthesizer,
    default_voice: Option<Arc<SpeakerProfile>>,
    api_key: Option<String>,
    staging_dir: PathBuf,
    speaker_cache: Option<PathBuf>,
}

impl AppContext {
    pub fn new(synthesizer: Synthesizer) -> Self {
        Self {
            synthesizer,
            default_voice: None,
            api_key: None,
            staging_dir: std::env::temp_dir(),
            speaker_cache: None,
        }
    }

    /// Voice used by `/audio/speech`. Kept apart from the speaker store.
    pub fn with_default_voice(mut self, profile: Arc<SpeakerProfile>) -> Self {
        self.default_voice = Some(profile);
        self
    }

    /// Require `Authorization: Bearer <key>` on every route. Empty keys disable the check.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Directory uploads are staged in while a speaker is being added.
    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Archive the speaker store is written to after every change.
    pub fn with_speaker_cache(mut self, path: PathBuf) -> Self {
        self.speaker_cache = Some(path);
        self
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn default_voice(&self) -> Option<&Arc<SpeakerProfile>> {
        self.default_voice.as_ref()
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Write the store to the speaker cache, if one is configured.
    ///
    /// The in-memory change has already happened, so a failed write is only logged.
    fn persist_speakers(&self) {
        if let Some(path) = &self.speaker_cache {
            if let Err(e) = self.synthesizer.store().save(path) {
                log::error!("Failed to write speaker cache {}: {e}", path.display());
            }
        }
    }
}

/// Build the application router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/models", get(routes::list_models))
        .route("/audio/speech", post(routes::speech))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/audio/speech", post(routes::speech))
        .route(
            "/inference_sft",
            get(routes::inference_sft).post(routes::inference_sft),
        )
        .route(
            "/inference_zero_shot",
            get(routes::inference_zero_shot).post(routes::inference_zero_shot),
        )
        .route("/add_speaker", post(routes::add_speaker))
        .route("/remove_speaker", post(routes::remove_speaker))
        .route("/get_speakers", get(routes::get_speakers))
        .layer(middleware::from_fn_with_state(ctx.clone(), require_api_key))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn require_api_key(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(key) = ctx.api_key.as_deref() {
        let supplied = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if supplied != Some(key) {
            return ApiError::unauthorized().into_response();
        }
    }
    next.run(request).await
}

/// Serve until Ctrl-C.
pub async fn serve(ctx: Arc<AppContext>, addr: SocketAddr) -> Result<(), TtsError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "Serving model '{}' on http://{addr}",
        ctx.synthesizer.model_id()
    );

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
            }
            log::info!("Shutting down");
        })
        .await?;
    Ok(())
}
