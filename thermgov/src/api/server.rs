use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::error::Result;
use crate::thermal::{GovernorHandle, GovernorSnapshot};
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "thermgov",
        description = "CPU thermal governor control API"
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "governor", description = "Throttle state and mode"),
        (name = "config", description = "Runtime configuration"),
        (name = "stats", description = "Throttle dwell times"),
    )
)]
struct ApiDoc;

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub governor: GovernorHandle,
}

impl SharedState {
    pub fn new(governor: GovernorHandle) -> Self {
        Self { governor }
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        self.governor.snapshot()
    }
}

/// Build the full application router.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    debug!("API server stopped");
    Ok(())
}
