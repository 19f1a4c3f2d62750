use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::application::errors::ServiceError;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                name = self.kind.name(),
                message = %self.message,
                cause = ?self.internal,
                "request_failed"
            );
        } else {
            tracing::info!(status = %status, name = self.kind.name(), message = %self.message, "request_rejected");
        }
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn renders_the_error_body_with_its_status() {
        let res = ServiceError::not_found("Page not found")
            .with_data(json!({ "url": "/nope" }))
            .into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value =
            serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["name"], "NotFound");
        assert_eq!(body["className"], "not-found");
        assert_eq!(body["code"], 404);
        assert_eq!(body["data"]["url"], "/nope");
    }

    #[tokio::test]
    async fn internal_causes_are_not_rendered() {
        let err: ServiceError = anyhow::anyhow!("password authentication failed for user").into();
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = String::from_utf8(
            to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec(),
        )
        .unwrap();
        assert!(!text.contains("password authentication"));
    }
}
