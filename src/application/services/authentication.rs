use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::application::errors::ServiceError;
use crate::application::ports::user_repository::UserRepository;
use crate::application::service::{Params, Service, ServiceResult};
use crate::application::use_cases::auth::login::{Login, LoginRequest};
use crate::bootstrap::config::AuthSettings;
use crate::domain::users::User;

pub const PATH: &str = "authentication";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
}

#[derive(Debug, Deserialize)]
struct LocalPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct JwtPayload {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub strategy: &'static str,
    pub access_token: String,
    pub claims: Claims,
    pub user: User,
}

impl AuthResult {
    /// Response body; the user is returned without its password hash.
    pub fn to_json(&self) -> Value {
        let mut user = self.user.to_json();
        if let Some(obj) = user.as_object_mut() {
            obj.remove("password");
        }
        json!({
            "accessToken": self.access_token,
            "authentication": {
                "strategy": self.strategy,
                "accessToken": self.access_token,
                "payload": self.claims,
            },
            "user": user,
        })
    }
}

/// Issues and validates access tokens with the `local` and `jwt` strategies.
pub struct AuthenticationService {
    settings: AuthSettings,
    users: Arc<dyn UserRepository>,
}

fn invalid_login() -> ServiceError {
    ServiceError::not_authenticated("Invalid login")
}

impl AuthenticationService {
    pub fn new(settings: AuthSettings, users: Arc<dyn UserRepository>) -> Self {
        Self { settings, users }
    }

    pub fn issue(&self, user_id: &str) -> Result<(String, Claims), ServiceError> {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            aud: self.settings.audience.clone(),
            iss: self.settings.issuer.clone(),
            iat: now,
            exp: now + self.settings.expires_secs as usize,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.settings.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::from(anyhow::anyhow!("jwt encode failed: {e}")))?;
        Ok((token, claims))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.settings.audience.as_str()]);
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        jsonwebtoken::decode::<Claims>(
            token.trim(),
            &DecodingKey::from_secret(self.settings.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| ServiceError::not_authenticated(format!("Invalid access token: {e}")))
    }

    /// Validates `token` and loads the user it was issued for.
    pub async fn resolve(&self, token: &str) -> Result<AuthResult, ServiceError> {
        let claims = self.verify(token)?;
        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ServiceError::not_authenticated("Could not find entity"))?;
        Ok(AuthResult {
            strategy: "jwt",
            access_token: token.trim().to_string(),
            claims,
            user,
        })
    }

    pub async fn authenticate(&self, data: &Value) -> Result<AuthResult, ServiceError> {
        let strategy = data.get("strategy").and_then(Value::as_str).unwrap_or("");
        match strategy {
            "local" => {
                // missing credentials fail like wrong ones
                let payload: LocalPayload =
                    serde_json::from_value(data.clone()).map_err(|_| invalid_login())?;
                let uc = Login {
                    repo: self.users.as_ref(),
                };
                let user = uc
                    .execute(&LoginRequest {
                        email: payload.email,
                        password: payload.password,
                    })
                    .await?
                    .ok_or_else(invalid_login)?;
                let (access_token, claims) = self.issue(&user.id)?;
                tracing::info!(user_id = %user.id, "local_login_succeeded");
                Ok(AuthResult {
                    strategy: "local",
                    access_token,
                    claims,
                    user,
                })
            }
            "jwt" => {
                let payload: JwtPayload = serde_json::from_value(data.clone())
                    .map_err(|e| ServiceError::bad_request(format!("Invalid jwt login: {e}")))?;
                self.resolve(&payload.access_token).await
            }
            other => Err(ServiceError::not_authenticated(format!(
                "Invalid authentication information (strategy '{other}' not allowed)"
            ))),
        }
    }
}

#[async_trait]
impl Service for AuthenticationService {
    async fn create(&self, data: Value, _params: &Params) -> ServiceResult {
        Ok(self.authenticate(&data).await?.to_json())
    }

    /// Logout: validates the token named by `id` or carried by the call.
    async fn remove(&self, id: Option<&str>, params: &Params) -> ServiceResult {
        let token = id
            .filter(|t| !t.is_empty())
            .or(params.access_token.as_deref())
            .ok_or_else(|| ServiceError::not_authenticated("Not authenticated"))?;
        Ok(self.resolve(token).await?.to_json())
    }

    // login results carry access tokens
    fn publishes_events(&self) -> bool {
        false
    }
}

/// Extracts the token from an `Authorization` header value (`Bearer <t>` or a raw token).
pub fn token_from_header(value: &str) -> Option<String> {
    let value = value.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None if value.eq_ignore_ascii_case("bearer") => return None,
        None => value,
    };
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
