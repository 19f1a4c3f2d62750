use axum::http::Uri;
use serde_json::json;

use crate::application::errors::ServiceError;

/// Answers every request no middleware, static file or transport claimed,
/// including a known path asked with a method it does not serve.
pub async fn not_found(uri: Uri) -> ServiceError {
    ServiceError::not_found("Page not found").with_data(json!({ "url": uri.to_string() }))
}
