//! axum integration.
//!
//! ```rust,no_run
//! use axum::Router;
//! use modgate::{TranslateConfig, Translator};
//! use tower_http::services::ServeDir;
//!
//! # async fn run() -> modgate::Result<()> {
//! let translator = Translator::new(TranslateConfig::new("www")).await?;
//! let app: Router = translator.apply(Router::new().fallback_service(ServeDir::new("www")));
//! # Ok(())
//! # }
//! ```

use crate::coordinator::Translator;
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;

/// Middleware function for [`axum::middleware::from_fn_with_state`].
pub async fn translate_modules(
    State(translator): State<Translator>,
    request: Request,
    next: Next,
) -> Response {
    translator.handle(request, next).await
}

impl Translator {
    /// Layer the middleware over every route (and fallback) of `router`.
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, translate_modules))
    }
}
