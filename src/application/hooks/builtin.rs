use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::errors::ServiceError;
use crate::application::hooks::{Hook, HookContext};
use crate::infrastructure::crypto;

/// Requires a valid access token on calls from external providers and puts
/// the authenticated user into `params.user`.
pub struct Authenticate {
    strategies: Vec<String>,
}

pub fn authenticate(strategies: &[&str]) -> Arc<dyn Hook> {
    Arc::new(Authenticate {
        strategies: strategies.iter().map(|s| s.to_string()).collect(),
    })
}

#[async_trait]
impl Hook for Authenticate {
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError> {
        if !ctx.params.is_external() || ctx.params.user.is_some() {
            return Ok(());
        }
        if !self.strategies.iter().any(|s| s == "jwt") {
            return Err(ServiceError::not_authenticated("Not authenticated"));
        }
        let token = ctx
            .params
            .access_token
            .clone()
            .ok_or_else(|| ServiceError::not_authenticated("Not authenticated"))?;
        let auth = ctx.app.authentication()?;
        let result = auth.resolve(&token).await?;
        let mut user = result.user.to_json();
        if let Some(obj) = user.as_object_mut() {
            obj.remove("password");
        }
        ctx.params.user = Some(user);
        Ok(())
    }
}

/// Replaces a plain-text password field in `data` (object or array of objects) with its hash.
pub struct HashPassword {
    field: String,
}

pub fn hash_password(field: &str) -> Arc<dyn Hook> {
    Arc::new(HashPassword {
        field: field.to_string(),
    })
}

impl HashPassword {
    fn hash_in(&self, item: &mut Value) -> Result<(), ServiceError> {
        let Some(obj) = item.as_object_mut() else {
            return Ok(());
        };
        if let Some(Value::String(plain)) = obj.get(&self.field) {
            if plain.is_empty() {
                return Ok(());
            }
            let hash = crypto::hash_password(plain)?;
            obj.insert(self.field.clone(), Value::String(hash));
        }
        Ok(())
    }
}

#[async_trait]
impl Hook for HashPassword {
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError> {
        match ctx.data.as_mut() {
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    self.hash_in(item)?;
                }
                Ok(())
            }
            Some(item) => self.hash_in(item),
            None => Ok(()),
        }
    }
}

/// Strips fields from results. Real-time dispatch is always stripped; the
/// returned result only for external providers.
pub struct Protect {
    fields: Vec<String>,
}

pub fn protect(fields: &[&str]) -> Arc<dyn Hook> {
    Arc::new(Protect {
        fields: fields.iter().map(|s| s.to_string()).collect(),
    })
}

impl Protect {
    fn strip(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(|v| self.strip(v)).collect()),
            Value::Object(obj) => {
                let mut obj = obj.clone();
                // paginated find result
                if let Some(Value::Array(data)) = obj.get("data") {
                    let data = data.iter().map(|v| self.strip(v)).collect();
                    obj.insert("data".into(), Value::Array(data));
                }
                for field in &self.fields {
                    obj.remove(field);
                }
                Value::Object(obj)
            }
            other => other.clone(),
        }
    }
}

#[async_trait]
impl Hook for Protect {
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError> {
        let Some(result) = ctx.result.as_ref() else {
            return Ok(());
        };
        let safe = self.strip(result);
        if ctx.params.is_external() {
            ctx.result = Some(safe.clone());
        }
        ctx.dispatch = Some(safe);
        Ok(())
    }
}

/// Application error hook: logs failed calls, 5xx at error level.
pub struct LogError;

pub fn log_error() -> Arc<dyn Hook> {
    Arc::new(LogError)
}

#[async_trait]
impl Hook for LogError {
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError> {
        if let Some(err) = &ctx.error {
            if err.code() >= 500 {
                tracing::error!(
                    path = %ctx.path,
                    method = %ctx.method,
                    connection_id = ?ctx.params.connection,
                    error = %err,
                    cause = ?err.internal,
                    "service_call_failed"
                );
            } else {
                tracing::debug!(
                    path = %ctx.path,
                    method = %ctx.method,
                    connection_id = ?ctx.params.connection,
                    error = %err,
                    "service_call_rejected"
                );
            }
        }
        Ok(())
    }
}
