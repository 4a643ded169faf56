//! Cross-origin policy for the HTTP surface and the socket handshake.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, Response, StatusCode},
    middleware::Next,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::WILDCARD_ORIGIN;

/// Origins allowed to talk to the relay from a browser
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

impl AllowedOrigins {
    /// A `*` entry is dropped: credentialed CORS needs explicit origins.
    pub fn new(origins: Vec<String>) -> Self {
        let origins = origins
            .into_iter()
            .filter(|o| {
                if o.trim() == WILDCARD_ORIGIN {
                    tracing::warn!("Ignoring wildcard origin, list origins explicitly");
                    return false;
                }
                true
            })
            .collect();
        Self { origins }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.origins.iter().any(|o| o == origin)
    }

    fn header_values(&self) -> Vec<HeaderValue> {
        self.origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring unusable origin");
                    None
                }
            })
            .collect()
    }
}

/// CORS for the HTTP routes, credentials allowed
pub fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.header_values()))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build a 403 Forbidden response with message
fn forbidden(message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response
}

/// Reject browser handshakes coming from origins outside the allowed list.
///
/// Requests without an `Origin` header are not from a browser page and pass.
pub async fn ws_origin_middleware(
    State(origins): State<Arc<AllowedOrigins>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| origins.is_allowed(o))
            .unwrap_or(false);
        if !allowed {
            tracing::warn!(origin = ?origin, "Blocked WebSocket handshake from disallowed origin");
            return forbidden("Origin not allowed");
        }
    }

    next.run(request).await
}
