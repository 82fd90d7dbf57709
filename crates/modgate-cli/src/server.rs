//! HTTP server: static files with the translation middleware in front.

use crate::error::{CliError, Result};
use crate::ui;
use axum::Router;
use modgate::Translator;
use std::net::SocketAddr;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// `ServeDir` answers every path under `server_root`; the translator wraps
/// it, CORS and access logging wrap both.
pub fn build_router(translator: Translator, server_root: &Path) -> Router {
    translator
        .apply(Router::new().fallback_service(ServeDir::new(server_root)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `addr` until Ctrl+C.
///
/// # Errors
///
/// Returns error if the address can't be bound or the server fails
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    ui::success(&format!("Serving at http://{}", addr));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CliError::Server(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    ui::info("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use modgate::{BuilderKind, TranslateConfig};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_translates_and_serves() {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        fs::write(root.join("config.js"), "System.config({});\n").unwrap();
        fs::write(root.join("app.js"), "module.exports = 42;\n").unwrap();

        let config = TranslateConfig {
            builder: BuilderKind::Native,
            watch: false,
            ..TranslateConfig::new(&root)
        };
        let translator = Translator::new(config).await.unwrap();
        let app = build_router(translator, &root);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/app.js")
                    .header(header::ACCEPT, "module/x-module-loader-module */*")
                    .header(header::ORIGIN, "http://localhost:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"System.registerDynamic([]"));

        let response = app
            .oneshot(Request::builder().uri("/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"module.exports = 42;\n");
    }
}
