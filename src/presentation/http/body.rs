use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{StatusCode, header},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::application::errors::ServiceError;

/// Request body decoded from JSON or an urlencoded form. A request without a
/// content type must have an empty body, which decodes as `{}`.
pub struct Body<T = Value>(pub T);

fn rejected(status: StatusCode, text: String) -> ServiceError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::payload_too_large("Request body is too large")
    } else {
        ServiceError::bad_request(text)
    }
}

fn media_type(req: &Request) -> Option<String> {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ServiceError> {
    serde_json::from_value(value).map_err(|e| ServiceError::bad_request(e.to_string()))
}

#[axum::async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = match media_type(&req).as_deref() {
            Some("application/x-www-form-urlencoded") => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(|e| rejected(e.status(), e.body_text()))?;
                let mut obj = Map::new();
                for (k, v) in pairs {
                    obj.insert(k, Value::String(v));
                }
                Value::Object(obj)
            }
            Some(mt) if mt == "application/json" || mt.ends_with("+json") => {
                let Json(value) = Json::<Value>::from_request(req, state)
                    .await
                    .map_err(|e| rejected(e.status(), e.body_text()))?;
                value
            }
            Some(other) => {
                return Err(ServiceError::bad_request(format!(
                    "Unsupported content type '{other}'"
                )));
            }
            None => {
                let bytes = Bytes::from_request(req, state)
                    .await
                    .map_err(|e| rejected(e.status(), e.body_text()))?;
                if !bytes.iter().all(u8::is_ascii_whitespace) {
                    return Err(ServiceError::bad_request("Missing content type"));
                }
                Value::Object(Map::new())
            }
        };
        decode(value).map(Body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::ErrorKind;
    use axum::body::Body as HttpBody;
    use axum::extract::DefaultBodyLimit;
    use axum::http::Request as HttpRequest;
    use axum::routing::post;
    use axum::{Router, response::IntoResponse};
    use serde_json::json;
    use tower::ServiceExt;

    async fn body(content_type: Option<&str>, raw: &str) -> Result<Value, ServiceError> {
        let mut req = HttpRequest::builder().method("POST").uri("/");
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let req = req.body(HttpBody::from(raw.to_string())).unwrap();
        Body::<Value>::from_request(req, &()).await.map(|b| b.0)
    }

    #[tokio::test]
    async fn json_and_forms_decode_to_objects() {
        let v = body(Some("application/json; charset=utf-8"), r#"{"email":"a@b.co"}"#)
            .await
            .unwrap();
        assert_eq!(v, json!({ "email": "a@b.co" }));

        let v = body(
            Some("application/x-www-form-urlencoded"),
            "email=a%40b.co&password=x",
        )
        .await
        .unwrap();
        assert_eq!(v, json!({ "email": "a@b.co", "password": "x" }));

        assert_eq!(body(None, "").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn malformed_or_unsupported_bodies_are_bad_requests() {
        let err = body(Some("application/json"), "{nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        let err = body(Some("text/plain"), "hi").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        let err = body(None, "hi").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn oversized_bodies_are_payload_too_large() {
        async fn echo(Body(v): Body) -> impl IntoResponse {
            axum::Json(v)
        }
        let app = Router::new()
            .route("/", post(echo))
            .layer(DefaultBodyLimit::max(16));
        let res = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(HttpBody::from(r#"{"email":"much-too-long@example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
