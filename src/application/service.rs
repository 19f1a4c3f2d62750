use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::application::errors::ServiceError;
use crate::application::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Find,
    Get,
    Create,
    Update,
    Patch,
    Remove,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Find,
        Method::Get,
        Method::Create,
        Method::Update,
        Method::Patch,
        Method::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::Get => "get",
            Method::Create => "create",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Remove => "remove",
        }
    }

    /// Name of the event a successful call emits, if any.
    pub fn event(self) -> Option<&'static str> {
        match self {
            Method::Create => Some("created"),
            Method::Update => Some("updated"),
            Method::Patch => Some("patched"),
            Method::Remove => Some("removed"),
            Method::Find | Method::Get => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ServiceError::method_not_allowed(format!("Method '{s}' is not supported")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Rest,
    Socket,
}

/// Per-call parameters. `provider` is `None` for calls made from inside the server.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub query: Query,
    pub provider: Option<Provider>,
    pub access_token: Option<String>,
    pub user: Option<Value>,
    pub connection: Option<Uuid>,
}

impl Params {
    pub fn internal(query: Query) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    pub fn external(provider: Provider, query: Query, access_token: Option<String>) -> Self {
        Self {
            query,
            provider: Some(provider),
            access_token,
            ..Self::default()
        }
    }

    pub fn is_external(&self) -> bool {
        self.provider.is_some()
    }
}

pub type ServiceResult = Result<Value, ServiceError>;

fn not_implemented(method: Method) -> ServiceError {
    ServiceError::method_not_allowed(format!("Method `{method}` is not supported by this endpoint."))
}

/// A named CRUD resource. Methods a resource does not support keep the default
/// body and answer `MethodNotAllowed`.
#[async_trait]
pub trait Service: Send + Sync {
    async fn find(&self, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Find))
    }

    async fn get(&self, _id: &str, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Get))
    }

    async fn create(&self, _data: Value, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Create))
    }

    async fn update(&self, _id: &str, _data: Value, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Update))
    }

    async fn patch(&self, _id: Option<&str>, _data: Value, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Patch))
    }

    async fn remove(&self, _id: Option<&str>, _params: &Params) -> ServiceResult {
        Err(not_implemented(Method::Remove))
    }

    /// Whether successful writes are published to real-time channels.
    fn publishes_events(&self) -> bool {
        true
    }
}
