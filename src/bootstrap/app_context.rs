use std::sync::Arc;

use serde_json::Value;

use crate::application::channels::{Channels, ServiceEvent};
use crate::application::errors::ServiceError;
use crate::application::hooks::{HookContext, Hooks, run_error_hooks, run_hooks};
use crate::application::ports::database_port::DatabasePort;
use crate::application::registry::{ServiceEntry, ServiceRegistry};
use crate::application::service::{Method, Params, Service, ServiceResult};
use crate::application::services::authentication::AuthenticationService;
use crate::bootstrap::config::Config;

#[derive(Clone)]
pub struct AppContext {
    pub cfg: Config,
    services: Arc<AppServices>,
}

pub struct AppServices {
    database: Arc<dyn DatabasePort>,
    registry: ServiceRegistry,
    authentication: Option<Arc<AuthenticationService>>,
    hooks: Hooks,
    channels: Channels,
}

impl AppServices {
    pub fn new(
        database: Arc<dyn DatabasePort>,
        registry: ServiceRegistry,
        authentication: Option<Arc<AuthenticationService>>,
        hooks: Hooks,
        channels: Channels,
    ) -> Self {
        Self {
            database,
            registry,
            authentication,
            hooks,
            channels,
        }
    }
}

impl AppContext {
    pub fn new(cfg: Config, services: AppServices) -> Self {
        Self {
            cfg,
            services: Arc::new(services),
        }
    }

    pub fn database(&self) -> Arc<dyn DatabasePort> {
        self.services.database.clone()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.services.registry
    }

    pub fn channels(&self) -> &Channels {
        &self.services.channels
    }

    pub fn authentication(&self) -> Result<Arc<AuthenticationService>, ServiceError> {
        self.services
            .authentication
            .clone()
            .ok_or_else(|| ServiceError::general("Authentication is not configured"))
    }

    /// Runs one service call through the hook pipeline:
    /// app before, service before, the method, service after, app after.
    /// Failures go through the service error hooks, then the app error hooks.
    pub async fn call(
        &self,
        path: &str,
        method: Method,
        id: Option<String>,
        data: Option<Value>,
        params: Params,
    ) -> Result<Value, ServiceError> {
        let entry = self
            .services
            .registry
            .lookup(path)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("Service '{path}' not found")))?;
        let mut ctx = HookContext::new(self.clone(), &entry.path, method, id, data, params);

        if let Err(err) = self.pipeline(&entry, &mut ctx).await {
            ctx.error = Some(err.clone());
            run_error_hooks(&entry.hooks.error.for_method(method), &mut ctx).await;
            run_error_hooks(&self.services.hooks.error.for_method(method), &mut ctx).await;
            // an error hook may recover by clearing the error and setting a result
            match (ctx.error.take(), ctx.result.take()) {
                (None, Some(result)) => return Ok(result),
                (Some(err), _) => return Err(err),
                (None, None) => return Err(err),
            }
        }

        if entry.service.publishes_events() {
            self.publish(&ctx).await;
        }
        Ok(ctx.result.unwrap_or(Value::Null))
    }

    async fn pipeline(&self, entry: &ServiceEntry, ctx: &mut HookContext) -> Result<(), ServiceError> {
        let method = ctx.method;
        run_hooks(&self.services.hooks.before.for_method(method), ctx).await?;
        run_hooks(&entry.hooks.before.for_method(method), ctx).await?;
        // a before hook that sets a result skips the method
        if ctx.result.is_none() {
            ctx.result = Some(invoke(entry.service.as_ref(), ctx).await?);
        }
        run_hooks(&entry.hooks.after.for_method(method), ctx).await?;
        run_hooks(&self.services.hooks.after.for_method(method), ctx).await?;
        Ok(())
    }

    async fn publish(&self, ctx: &HookContext) {
        let Some(event) = ctx.method.event() else {
            return;
        };
        let Some(payload) = ctx.dispatch.as_ref().or(ctx.result.as_ref()) else {
            return;
        };
        let items = match payload {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        for data in items {
            let event = ServiceEvent {
                path: ctx.path.clone(),
                event,
                data,
            };
            self.services.channels.publish(&event).await;
        }
    }
}

fn require_id(id: Option<&str>, method: Method) -> Result<&str, ServiceError> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::bad_request(format!("An id must be provided to the '{method}' method")))
}

fn require_data(data: &Option<Value>, method: Method) -> Result<Value, ServiceError> {
    data.clone()
        .ok_or_else(|| ServiceError::bad_request(format!("A data object must be provided to the '{method}' method")))
}

async fn invoke(service: &dyn Service, ctx: &HookContext) -> ServiceResult {
    let id = ctx.id.as_deref();
    let params = &ctx.params;
    match ctx.method {
        Method::Find => service.find(params).await,
        Method::Get => service.get(require_id(id, Method::Get)?, params).await,
        Method::Create => service.create(require_data(&ctx.data, Method::Create)?, params).await,
        Method::Update => {
            let id = require_id(id, Method::Update)?;
            service.update(id, require_data(&ctx.data, Method::Update)?, params).await
        }
        Method::Patch => service.patch(id, require_data(&ctx.data, Method::Patch)?, params).await,
        Method::Remove => service.remove(id, params).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::application::channels::{ChannelHub, DefaultChannelPolicy};
    use crate::application::errors::ErrorKind;
    use crate::application::hooks::hook_fn;
    use crate::application::query::Query;
    use crate::testing;

    type Trail = Arc<Mutex<Vec<String>>>;

    struct Echo {
        trail: Trail,
    }

    #[async_trait]
    impl Service for Echo {
        async fn get(&self, id: &str, _params: &Params) -> ServiceResult {
            self.trail.lock().unwrap().push("method".into());
            if id == "boom" {
                return Err(ServiceError::general("exploded"));
            }
            Ok(json!({ "id": id, "secret": "s" }))
        }

        async fn create(&self, data: Value, _params: &Params) -> ServiceResult {
            Ok(data)
        }
    }

    fn mark(trail: &Trail, label: &'static str) -> Arc<dyn crate::application::hooks::Hook> {
        let trail = trail.clone();
        hook_fn(move |_ctx| {
            trail.lock().unwrap().push(label.into());
            Ok(())
        })
    }

    fn context(trail: &Trail, service_hooks: Hooks, app_hooks: Hooks, channels: Channels) -> AppContext {
        let mut registry = ServiceRegistry::new();
        registry.insert("echo", Arc::new(Echo { trail: trail.clone() }), service_hooks);
        let db: Arc<dyn DatabasePort> = Arc::new(testing::MemoryDatabase::default());
        AppContext::new(
            testing::config(),
            AppServices::new(db, registry, None, app_hooks, channels),
        )
    }

    fn no_channels() -> Channels {
        Channels::new(ChannelHub::new(), None)
    }

    #[tokio::test]
    async fn hooks_run_app_then_service_around_the_method() {
        let trail: Trail = Arc::default();
        let service_hooks = Hooks::new()
            .before_all(mark(&trail, "service before"))
            .after(&[Method::Get], mark(&trail, "service after"));
        let app_hooks = Hooks::new()
            .before_all(mark(&trail, "app before"))
            .after_all(mark(&trail, "app after"));
        let ctx = context(&trail, service_hooks, app_hooks, no_channels());

        let out = ctx
            .call("echo", Method::Get, Some("1".into()), None, Params::default())
            .await
            .unwrap();
        assert_eq!(out["id"], "1");
        assert_eq!(
            *trail.lock().unwrap(),
            ["app before", "service before", "method", "service after", "app after"]
        );
    }

    #[tokio::test]
    async fn errors_go_through_service_then_app_error_hooks() {
        let trail: Trail = Arc::default();
        let service_hooks = Hooks::new()
            .after_all(mark(&trail, "service after"))
            .error_all(mark(&trail, "service error"))
            .error(&[Method::Get], mark(&trail, "service get error"))
            .error(&[Method::Find], mark(&trail, "service find error"));
        let app_hooks = Hooks::new().error_all(mark(&trail, "app error"));
        let ctx = context(&trail, service_hooks, app_hooks, no_channels());

        let err = ctx
            .call("echo", Method::Get, Some("boom".into()), None, Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::GeneralError);
        assert_eq!(
            *trail.lock().unwrap(),
            ["method", "service error", "service get error", "app error"]
        );
    }

    #[tokio::test]
    async fn a_before_hook_result_skips_the_method() {
        let trail: Trail = Arc::default();
        let service_hooks = Hooks::new().before(
            &[Method::Get],
            hook_fn(|ctx| {
                ctx.result = Some(json!({ "cached": true }));
                Ok(())
            }),
        );
        let ctx = context(&trail, service_hooks, Hooks::new(), no_channels());
        let out = ctx
            .call("echo", Method::Get, Some("1".into()), None, Params::default())
            .await
            .unwrap();
        assert_eq!(out, json!({ "cached": true }));
        assert!(trail.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_ids_unknown_paths_and_unsupported_methods() {
        let trail: Trail = Arc::default();
        let ctx = context(&trail, Hooks::new(), Hooks::new(), no_channels());
        let err = ctx
            .call("echo", Method::Get, None, None, Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        let err = ctx
            .call("nope", Method::Find, None, None, Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = ctx
            .call("echo", Method::Find, None, None, Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodNotAllowed);
    }

    #[tokio::test]
    async fn writes_publish_one_event_per_item_using_dispatch() {
        let trail: Trail = Arc::default();
        let channels = Channels::new(ChannelHub::new(), Some(Arc::new(DefaultChannelPolicy)));
        let mut sub = channels.connect().await;
        channels.login(sub.id, json!({ "id": "u1" })).await;
        let service_hooks = Hooks::new().after_all(crate::application::hooks::protect(&["secret"]));
        let ctx = context(&trail, service_hooks, Hooks::new(), channels);

        let params = Params::internal(Query::default());
        let out = ctx
            .call(
                "echo",
                Method::Create,
                None,
                Some(json!([{ "id": "a", "secret": "s" }, { "id": "b", "secret": "s" }])),
                params,
            )
            .await
            .unwrap();
        // internal callers keep the full result
        assert_eq!(out[0]["secret"], "s");

        let first: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        let second: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "echo created");
        assert_eq!(first["data"], json!({ "id": "a" }));
        assert_eq!(second["data"]["id"], "b");

        ctx.call("echo", Method::Get, Some("1".into()), None, Params::default())
            .await
            .unwrap();
        assert!(sub.receiver.try_recv().is_err());
    }
}
