//! The request chain in front of every transport. Outermost first:
//! trace, security headers, CORS, compression, body limit, favicon, static
//! files. Whatever the static directory does not hold falls through to the
//! transports and then to the 404 handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{self, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower::{ServiceBuilder, ServiceExt};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::bootstrap::app::BootstrapError;
use crate::bootstrap::config::Config;

/// Names of the layers in request order.
pub const MIDDLEWARE_ORDER: [&str; 7] = [
    "trace",
    "security-headers",
    "cors",
    "compression",
    "body-limit",
    "favicon",
    "static",
];

/// Hardening headers, content-security-policy left out.
const SECURITY_HEADERS: [(&str, &str); 11] = [
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

const FAVICON_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

/// The icon is read once at startup and served from memory.
#[derive(Clone)]
pub struct Favicon {
    body: Bytes,
    etag: HeaderValue,
}

impl Favicon {
    pub fn load(path: &Path) -> Result<Self, BootstrapError> {
        let body = std::fs::read(path).map_err(|_| BootstrapError::MissingFavicon(path.to_path_buf()))?;
        if body.is_empty() {
            return Err(BootstrapError::MissingFavicon(path.to_path_buf()));
        }
        // weak validator: length and a cheap content fold
        let fold = body
            .iter()
            .fold(0u32, |acc, b| acc.rotate_left(5) ^ u32::from(*b));
        let etag = HeaderValue::from_str(&format!("W/\"{:x}-{:x}\"", body.len(), fold))
            .unwrap_or_else(|_| HeaderValue::from_static("W/\"favicon\""));
        Ok(Self {
            body: Bytes::from(body),
            etag,
        })
    }
}

#[derive(Clone)]
pub struct MiddlewareStack {
    cors: CorsLayer,
    favicon: Arc<Favicon>,
    public_dir: PathBuf,
    body_limit: usize,
}

impl MiddlewareStack {
    /// Validates everything the chain depends on; any problem aborts startup.
    pub fn from_config(cfg: &Config) -> Result<Self, BootstrapError> {
        if !cfg.public_dir.is_dir() {
            return Err(BootstrapError::MissingPublicDir(cfg.public_dir.clone()));
        }
        let favicon = Favicon::load(&cfg.favicon_path())?;
        Ok(Self {
            cors: cors_layer(cfg)?,
            favicon: Arc::new(favicon),
            public_dir: cfg.public_dir.clone(),
            body_limit: cfg.body_limit_bytes,
        })
    }

    pub fn apply(&self, router: Router) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|req: &http::Request<_>| {
            let method = req.method().clone();
            let uri = req.uri().clone();
            let matched = req
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            tracing::info_span!("http", %method, %uri, matched_path = %matched)
        });
        let static_files = ServeDir::new(&self.public_dir);
        tracing::debug!(layers = ?MIDDLEWARE_ORDER, "middleware_applied");
        router.layer(
            ServiceBuilder::new()
                .layer(trace)
                .layer(middleware::from_fn(security_headers))
                .layer(self.cors.clone())
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(self.body_limit))
                .layer(middleware::from_fn_with_state(self.favicon.clone(), favicon))
                .layer(middleware::from_fn_with_state(static_files, serve_static)),
        )
    }
}

fn cors_layer(cfg: &Config) -> Result<CorsLayer, BootstrapError> {
    let allow_origin = match cfg.frontend_url.as_deref() {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(origin)
                .map_err(|_| BootstrapError::InvalidOrigin(origin.to_string()))?,
        ),
        // development convenience
        None => AllowOrigin::mirror_request(),
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true))
}

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert(HeaderValue::from_static(value));
    }
    headers.remove("x-powered-by");
    res
}

async fn favicon(State(icon): State<Arc<Favicon>>, req: Request, next: Next) -> Response {
    if req.uri().path() != "/favicon.ico" {
        return next.run(req).await;
    }
    let method = req.method();
    if method != Method::GET && method != Method::HEAD {
        let status = if method == Method::OPTIONS {
            StatusCode::OK
        } else {
            StatusCode::METHOD_NOT_ALLOWED
        };
        return (status, [(header::ALLOW, "GET, HEAD, OPTIONS")]).into_response();
    }
    let fresh = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .is_some_and(|tag| *tag == icon.etag);
    let cache = HeaderValue::from_str(&format!("public, max-age={FAVICON_MAX_AGE_SECS}"))
        .unwrap_or_else(|_| HeaderValue::from_static("public"));
    let headers = [
        (header::CACHE_CONTROL, cache),
        (header::ETAG, icon.etag.clone()),
        (header::CONTENT_TYPE, HeaderValue::from_static("image/x-icon")),
    ];
    if fresh {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(icon.body.clone())
    };
    (headers, body).into_response()
}

/// Serves GET/HEAD requests naming a file under the public directory and
/// passes every other request on.
async fn serve_static(State(dir): State<ServeDir>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return next.run(req).await;
    }
    let mut lookup = http::Request::builder()
        .method(req.method().clone())
        .uri(req.uri().clone());
    if let Some(headers) = lookup.headers_mut() {
        headers.extend(req.headers().clone());
    }
    let Ok(lookup) = lookup.body(Body::empty()) else {
        return next.run(req).await;
    };
    match dir.oneshot(lookup).await {
        Ok(res) if res.status() != StatusCode::NOT_FOUND => res.map(Body::new),
        _ => next.run(req).await,
    }
}
