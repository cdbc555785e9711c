use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, request::Parts, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::settings::CorsSettings;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Origin allow-list plus one trusted preview-deployment suffix.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    preview_suffix: String,
}

impl CorsPolicy {
    pub fn new(settings: &CorsSettings) -> Self {
        Self {
            allowed_origins: settings.allowed_origins.clone(),
            preview_suffix: settings.preview_suffix.clone(),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        if self.allowed_origins.iter().any(|o| o == origin) {
            return true;
        }

        !self.preview_suffix.is_empty()
            && origin.starts_with("https://")
            && origin.ends_with(&self.preview_suffix)
    }

    /// Origins outside the policy get no `Access-Control-Allow-Origin`, so the
    /// browser blocks the response. Preflights are answered by the layer
    /// before routing.
    pub fn layer(self) -> CorsLayer {
        let policy = Arc::new(self);

        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _parts: &Parts| {
                    origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
                },
            ))
            .allow_credentials(true)
            .allow_headers([
                header::AUTHORIZATION,
                HeaderName::from_static("x-client-info"),
                HeaderName::from_static("apikey"),
                header::CONTENT_TYPE,
                HeaderName::from_static("x-request-id"),
            ])
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .max_age(PREFLIGHT_MAX_AGE)
    }
}
