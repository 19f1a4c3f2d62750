use axum::extract::FromRequestParts;
use axum::http::{StatusCode, header, request::Parts};

use crate::application::services::authentication::token_from_header;

/// Access token carried by a request: `Authorization` header first, then the
/// `access_token` cookie.
pub struct Bearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(token_from_header)
        {
            return Ok(Bearer(token));
        }

        if let Some(token) = parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| get_cookie(cookies, "access_token"))
        {
            return Ok(Bearer(token));
        }

        Err(StatusCode::UNAUTHORIZED)
    }
}

pub(crate) fn get_cookie(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k.trim() == name && !v.trim().is_empty()).then(|| v.trim().to_string())
    })
}
