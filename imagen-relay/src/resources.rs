//! HTTP resource server for generated images.
//!
//! Routes:
//! - `GET /images/<filename>` - raw bytes of a stored image
//! - `GET /list-images` - JSON array of stored file names
//!
//! Every response allows any origin.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use imagen_relay_common::server::ServerError;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::store::ArtifactStore;

/// Permissive CORS policy applied to every route.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

/// Build the resource router over `store`.
pub fn router(store: ArtifactStore) -> Router {
    let images = ServeDir::new(store.images_dir());

    Router::new()
        .route("/list-images", get(list_images))
        .nest_service("/images", images)
        .with_state(store)
        .layer(cors_layer())
}

async fn list_images(State(store): State<ArtifactStore>) -> Response {
    match store.list().await {
        Ok(names) => Json(names).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list images");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Bind the resource listener.
pub async fn bind(addr: &str, port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind((addr, port))
        .await
        .map_err(|e| ServerError::BindFailed {
            addr: format!("{}:{}", addr, port),
            message: e.to_string(),
        })
}

/// Serve resources on `listener` until `shutdown` fires or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    store: ArtifactStore,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, images_dir = %store.images_dir().display(), "Resource server listening");
    }

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    info!("Resource server stopped");
    Ok(())
}
