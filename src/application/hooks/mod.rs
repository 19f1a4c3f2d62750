//! Hook pipeline: interceptors that run before, after, or on error of a service call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::errors::ServiceError;
use crate::application::service::{Method, Params};
use crate::bootstrap::app_context::AppContext;

pub mod builtin;

pub use builtin::{authenticate, hash_password, log_error, protect};

/// State shared by every hook of one service call.
pub struct HookContext {
    pub app: AppContext,
    pub path: String,
    pub method: Method,
    pub id: Option<String>,
    pub data: Option<Value>,
    pub params: Params,
    pub result: Option<Value>,
    /// Result variant sent to real-time channels. Falls back to `result`.
    pub dispatch: Option<Value>,
    pub error: Option<ServiceError>,
}

impl HookContext {
    pub fn new(
        app: AppContext,
        path: &str,
        method: Method,
        id: Option<String>,
        data: Option<Value>,
        params: Params,
    ) -> Self {
        Self {
            app,
            path: path.to_string(),
            method,
            id,
            data,
            params,
            result: None,
            dispatch: None,
            error: None,
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError>;
}

struct HookFn<F>(F);

#[async_trait]
impl<F> Hook for HookFn<F>
where
    F: Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync,
{
    async fn run(&self, ctx: &mut HookContext) -> Result<(), ServiceError> {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a hook.
pub fn hook_fn<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut HookContext) -> Result<(), ServiceError> + Send + Sync + 'static,
{
    Arc::new(HookFn(f))
}

/// Hooks of one phase: `all` hooks run first, then the method-specific ones.
#[derive(Clone, Default)]
pub struct HookMap {
    all: Vec<Arc<dyn Hook>>,
    by_method: HashMap<Method, Vec<Arc<dyn Hook>>>,
}

impl HookMap {
    pub fn push_all(&mut self, hook: Arc<dyn Hook>) {
        self.all.push(hook);
    }

    pub fn push(&mut self, methods: &[Method], hook: Arc<dyn Hook>) {
        for m in methods {
            self.by_method.entry(*m).or_default().push(hook.clone());
        }
    }

    pub fn for_method(&self, method: Method) -> Vec<Arc<dyn Hook>> {
        let mut hooks = self.all.clone();
        if let Some(specific) = self.by_method.get(&method) {
            hooks.extend(specific.iter().cloned());
        }
        hooks
    }
}

/// Before/after/error hook sets, used both per service and application wide.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before: HookMap,
    pub after: HookMap,
    pub error: HookMap,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_all(mut self, hook: Arc<dyn Hook>) -> Self {
        self.before.push_all(hook);
        self
    }

    pub fn before(mut self, methods: &[Method], hook: Arc<dyn Hook>) -> Self {
        self.before.push(methods, hook);
        self
    }

    pub fn after_all(mut self, hook: Arc<dyn Hook>) -> Self {
        self.after.push_all(hook);
        self
    }

    pub fn after(mut self, methods: &[Method], hook: Arc<dyn Hook>) -> Self {
        self.after.push(methods, hook);
        self
    }

    pub fn error_all(mut self, hook: Arc<dyn Hook>) -> Self {
        self.error.push_all(hook);
        self
    }

    pub fn error(mut self, methods: &[Method], hook: Arc<dyn Hook>) -> Self {
        self.error.push(methods, hook);
        self
    }
}

/// Runs `hooks` in order, stopping at the first failure.
pub async fn run_hooks(hooks: &[Arc<dyn Hook>], ctx: &mut HookContext) -> Result<(), ServiceError> {
    for hook in hooks {
        hook.run(ctx).await?;
    }
    Ok(())
}

/// Runs error hooks; a failing error hook replaces the error in flight.
pub async fn run_error_hooks(hooks: &[Arc<dyn Hook>], ctx: &mut HookContext) {
    for hook in hooks {
        if let Err(replacement) = hook.run(ctx).await {
            ctx.error = Some(replacement);
        }
    }
}
