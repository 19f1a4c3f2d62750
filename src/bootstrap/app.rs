//! Ordered composition root.
//!
//! Startup runs through fixed stages: configuration, middleware, transports,
//! database, authentication, services, channels, fallback, hooks. Each step
//! checks it comes no earlier than the last one; only `Services` may repeat.
//! The first failing step aborts startup and nothing is served.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;

use crate::application::channels::{ChannelHub, ChannelPolicy, Channels, DefaultChannelPolicy};
use crate::application::hooks::{Hooks, log_error};
use crate::application::ports::database_port::{DatabaseConnector, DatabasePort};
use crate::application::registry::ServiceRegistry;
use crate::application::service::Service;
use crate::application::services::authentication::{self, AuthenticationService};
use crate::application::services::users::{self, UsersService};
use crate::bootstrap::app_context::{AppContext, AppServices};
use crate::bootstrap::config::Config;
use crate::presentation::http::middleware::MiddlewareStack;
use crate::presentation::http::{fallback, health, rest};
use crate::presentation::ws;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Configuration,
    Middleware,
    Transports,
    Database,
    Authentication,
    Services,
    Channels,
    Fallback,
    Hooks,
}

impl Stage {
    pub const MANDATORY: [Stage; 7] = [
        Stage::Configuration,
        Stage::Middleware,
        Stage::Transports,
        Stage::Database,
        Stage::Authentication,
        Stage::Services,
        Stage::Fallback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Middleware => "middleware",
            Stage::Transports => "transports",
            Stage::Database => "database",
            Stage::Authentication => "authentication",
            Stage::Services => "services",
            Stage::Channels => "channels",
            Stage::Fallback => "fallback",
            Stage::Hooks => "hooks",
        }
    }

    pub fn repeatable(self) -> bool {
        self == Stage::Services
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("stage `{stage}` cannot run after `{after}`")]
    OutOfOrder { stage: Stage, after: Stage },
    #[error("stage `{0}` is already registered")]
    DuplicateStage(Stage),
    #[error("stage `{0}` was never registered")]
    MissingStage(Stage),
    #[error("a service is already mounted at `{0}`")]
    DuplicateService(String),
    #[error("favicon not found at {}", .0.display())]
    MissingFavicon(PathBuf),
    #[error("public directory not found at {}", .0.display())]
    MissingPublicDir(PathBuf),
    #[error("invalid CORS origin `{0}`")]
    InvalidOrigin(String),
    #[error("database connection failed")]
    Database(#[source] anyhow::Error),
}

/// One ledger entry: what was registered, in which stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub stage: Stage,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transports {
    pub rest: bool,
    pub realtime: bool,
}

impl Default for Transports {
    fn default() -> Self {
        Self {
            rest: true,
            realtime: true,
        }
    }
}

pub struct AppBuilder {
    cfg: Config,
    ledger: Vec<Registration>,
    middleware: Option<MiddlewareStack>,
    transports: Option<Transports>,
    database: Option<Arc<dyn DatabasePort>>,
    authentication: Option<Arc<AuthenticationService>>,
    registry: ServiceRegistry,
    channels: Option<Arc<dyn ChannelPolicy>>,
    hooks: Hooks,
}

impl AppBuilder {
    pub fn new(cfg: Config) -> Self {
        let mut builder = Self {
            cfg,
            ledger: Vec::new(),
            middleware: None,
            transports: None,
            database: None,
            authentication: None,
            registry: ServiceRegistry::new(),
            channels: None,
            hooks: Hooks::new(),
        };
        builder.record(Stage::Configuration, "config");
        builder
    }

    fn check(&self, stage: Stage) -> Result<(), BootstrapError> {
        let Some(last) = self.ledger.last() else {
            return Ok(());
        };
        if stage < last.stage {
            return Err(BootstrapError::OutOfOrder {
                stage,
                after: last.stage,
            });
        }
        if stage == last.stage && !stage.repeatable() {
            return Err(BootstrapError::DuplicateStage(stage));
        }
        Ok(())
    }

    fn record(&mut self, stage: Stage, name: &str) {
        tracing::info!(stage = %stage, name, "bootstrap_registered");
        self.ledger.push(Registration {
            stage,
            name: name.to_string(),
        });
    }

    /// The connected database; entering `stage` without one is out of order.
    fn connected(&self, stage: Stage) -> Result<Arc<dyn DatabasePort>, BootstrapError> {
        self.database.clone().ok_or_else(|| BootstrapError::OutOfOrder {
            stage,
            after: self
                .ledger
                .last()
                .map_or(Stage::Configuration, |r| r.stage),
        })
    }

    pub fn middleware(mut self) -> Result<Self, BootstrapError> {
        self.check(Stage::Middleware)?;
        self.middleware = Some(MiddlewareStack::from_config(&self.cfg)?);
        self.record(Stage::Middleware, "security-chain");
        Ok(self)
    }

    pub fn transports(mut self, transports: Transports) -> Result<Self, BootstrapError> {
        self.check(Stage::Transports)?;
        self.transports = Some(transports);
        let name = match (transports.rest, transports.realtime) {
            (true, true) => "rest+websocket",
            (true, false) => "rest",
            (false, true) => "websocket",
            (false, false) => "none",
        };
        self.record(Stage::Transports, name);
        Ok(self)
    }

    pub async fn database(mut self, connector: &dyn DatabaseConnector) -> Result<Self, BootstrapError> {
        self.check(Stage::Database)?;
        let database = connector
            .connect(&self.cfg.database)
            .await
            .map_err(BootstrapError::Database)?;
        self.database = Some(database);
        self.record(Stage::Database, "postgres");
        Ok(self)
    }

    /// Builds the authentication service and mounts it at `authentication`.
    pub fn authentication(mut self) -> Result<Self, BootstrapError> {
        self.check(Stage::Authentication)?;
        let database = self.connected(Stage::Authentication)?;
        let auth = Arc::new(AuthenticationService::new(
            self.cfg.auth.clone(),
            database.users(),
        ));
        let service: Arc<dyn Service> = auth.clone();
        if !self.registry.insert(authentication::PATH, service, Hooks::new()) {
            return Err(BootstrapError::DuplicateService(authentication::PATH.to_string()));
        }
        self.authentication = Some(auth);
        self.record(Stage::Authentication, authentication::PATH);
        Ok(self)
    }

    /// Mounts a service built from the connected database.
    pub fn service<F>(mut self, path: &str, factory: F, hooks: Hooks) -> Result<Self, BootstrapError>
    where
        F: FnOnce(&Arc<dyn DatabasePort>, &Config) -> Arc<dyn Service>,
    {
        self.check(Stage::Services)?;
        let database = self.connected(Stage::Services)?;
        if self.registry.contains(path) {
            return Err(BootstrapError::DuplicateService(path.to_string()));
        }
        let service = factory(&database, &self.cfg);
        if !self.registry.insert(path, service, hooks) {
            return Err(BootstrapError::DuplicateService(path.to_string()));
        }
        self.record(Stage::Services, path);
        Ok(self)
    }

    pub fn channels<P>(mut self, policy: P) -> Result<Self, BootstrapError>
    where
        P: ChannelPolicy + 'static,
    {
        self.check(Stage::Channels)?;
        self.channels = Some(Arc::new(policy));
        self.record(Stage::Channels, "channels");
        Ok(self)
    }

    pub fn fallback(mut self) -> Result<Self, BootstrapError> {
        self.check(Stage::Fallback)?;
        self.record(Stage::Fallback, "not-found+error-handler");
        Ok(self)
    }

    pub fn hooks(mut self, hooks: Hooks) -> Result<Self, BootstrapError> {
        self.check(Stage::Hooks)?;
        self.hooks = hooks;
        self.record(Stage::Hooks, "app-hooks");
        Ok(self)
    }

    /// Freezes the application. Every mandatory stage must have run.
    pub fn build(self) -> Result<App, BootstrapError> {
        for stage in Stage::MANDATORY {
            if !self.ledger.iter().any(|r| r.stage == stage) {
                return Err(BootstrapError::MissingStage(stage));
            }
        }
        let middleware = self
            .middleware
            .ok_or(BootstrapError::MissingStage(Stage::Middleware))?;
        let transports = self
            .transports
            .ok_or(BootstrapError::MissingStage(Stage::Transports))?;
        let database = self
            .database
            .ok_or(BootstrapError::MissingStage(Stage::Database))?;

        let channels = Channels::new(ChannelHub::new(), self.channels);
        let ctx = AppContext::new(
            self.cfg,
            AppServices::new(
                database,
                self.registry,
                self.authentication,
                self.hooks,
                channels,
            ),
        );

        let mut router = Router::new();
        if transports.rest {
            router = router
                .merge(health::routes(ctx.clone()))
                .merge(rest::routes(ctx.clone()));
        }
        if transports.realtime {
            router = router.merge(ws::routes(ctx.clone()));
        }
        let router = middleware.apply(router.fallback(fallback::not_found));

        Ok(App {
            ctx,
            router,
            ledger: self.ledger,
        })
    }
}

/// The composed application: shared context, HTTP router and registration ledger.
#[derive(Clone)]
pub struct App {
    ctx: AppContext,
    router: Router,
    ledger: Vec<Registration>,
}

impl App {
    pub fn registrations(&self) -> &[Registration] {
        &self.ledger
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Application-wide hooks.
pub fn app_hooks() -> Hooks {
    Hooks::new().error_all(log_error())
}

/// Composes the full application in its fixed order.
pub async fn compose(cfg: Config, connector: &dyn DatabaseConnector) -> Result<App, BootstrapError> {
    AppBuilder::new(cfg)
        .middleware()?
        .transports(Transports::default())?
        .database(connector)
        .await?
        .authentication()?
        .service(
            users::PATH,
            |db, cfg| Arc::new(UsersService::new(db.users(), cfg.paginate)),
            users::hooks(),
        )?
        .channels(DefaultChannelPolicy)?
        .fallback()?
        .hooks(app_hooks())?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MemoryDatabase, UnreachableDatabase};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn failure<T>(result: Result<T, BootstrapError>) -> BootstrapError {
        match result {
            Ok(_) => panic!("expected the step to fail"),
            Err(e) => e,
        }
    }

    fn builder(t: &testing::TestApp) -> AppBuilder {
        AppBuilder::new(t.app.context().cfg.clone())
    }

    #[tokio::test]
    async fn composition_records_every_stage_in_order() {
        let t = testing::test_app().await;
        let stages: Vec<Stage> = t.app.registrations().iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            [
                Stage::Configuration,
                Stage::Middleware,
                Stage::Transports,
                Stage::Database,
                Stage::Authentication,
                Stage::Services,
                Stage::Channels,
                Stage::Fallback,
                Stage::Hooks,
            ]
        );
        let names: Vec<&str> = t.app.registrations().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names[4], "authentication");
        assert_eq!(names[5], "users");
        assert_eq!(t.app.context().registry().paths(), ["authentication", "users"]);
    }

    #[tokio::test]
    async fn earlier_stages_and_repeats_are_rejected() {
        let t = testing::test_app().await;
        let b = builder(&t).middleware().unwrap().transports(Transports::default()).unwrap();
        let err = failure(b.middleware());
        assert!(matches!(
            err,
            BootstrapError::OutOfOrder {
                stage: Stage::Middleware,
                after: Stage::Transports
            }
        ));

        let b = builder(&t).middleware().unwrap();
        assert!(matches!(
            failure(b.middleware()),
            BootstrapError::DuplicateStage(Stage::Middleware)
        ));

        let b = builder(&t)
            .database(&t.db)
            .await
            .unwrap()
            .fallback()
            .unwrap();
        assert!(matches!(
            failure(b.authentication()),
            BootstrapError::OutOfOrder { .. }
        ));
    }

    #[tokio::test]
    async fn services_repeat_but_paths_stay_unique() {
        let t = testing::test_app().await;
        let factory = |db: &Arc<dyn DatabasePort>, cfg: &Config| -> Arc<dyn Service> {
            Arc::new(UsersService::new(db.users(), cfg.paginate))
        };
        let b = builder(&t)
            .database(&t.db)
            .await
            .unwrap()
            .service("users", factory, Hooks::new())
            .unwrap()
            .service("people", factory, Hooks::new())
            .unwrap();
        assert!(matches!(
            failure(b.service("/users/", factory, Hooks::new())),
            BootstrapError::DuplicateService(p) if p == "/users/"
        ));
    }

    #[tokio::test]
    async fn services_need_a_database_and_build_needs_every_mandatory_stage() {
        let t = testing::test_app().await;
        let b = builder(&t).middleware().unwrap();
        assert!(matches!(
            failure(b.service("users", |db, cfg| Arc::new(UsersService::new(db.users(), cfg.paginate)), Hooks::new())),
            BootstrapError::OutOfOrder {
                stage: Stage::Services,
                after: Stage::Middleware
            }
        ));
        let b = builder(&t).middleware().unwrap();
        assert!(matches!(
            failure(b.authentication()),
            BootstrapError::OutOfOrder {
                stage: Stage::Authentication,
                after: Stage::Middleware
            }
        ));
        assert!(matches!(
            failure(builder(&t).middleware().unwrap().build()),
            BootstrapError::MissingStage(Stage::Transports)
        ));
        let b = builder(&t)
            .middleware()
            .unwrap()
            .transports(Transports::default())
            .unwrap()
            .fallback()
            .unwrap();
        assert!(matches!(
            failure(b.build()),
            BootstrapError::MissingStage(Stage::Database)
        ));

        let b = builder(&t)
            .middleware()
            .unwrap()
            .transports(Transports::default())
            .unwrap()
            .database(&t.db)
            .await
            .unwrap()
            .authentication()
            .unwrap()
            .service("users", |db, cfg| Arc::new(UsersService::new(db.users(), cfg.paginate)), Hooks::new())
            .unwrap();
        assert!(matches!(
            failure(b.build()),
            BootstrapError::MissingStage(Stage::Fallback)
        ));
    }

    #[tokio::test]
    async fn an_unreachable_database_aborts_startup() {
        let t = testing::test_app().await;
        let err = failure(compose(t.app.context().cfg.clone(), &UnreachableDatabase).await);
        assert!(matches!(err, BootstrapError::Database(_)));
    }

    #[tokio::test]
    async fn a_missing_favicon_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = testing::config_with(&[("PUBLIC_DIR", dir.path().to_str().unwrap())]);
        let err = failure(compose(cfg, &MemoryDatabase::default()).await);
        assert!(matches!(err, BootstrapError::MissingFavicon(_)));
    }

    async fn send(app: &App, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.router().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn json_req(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn users_are_created_and_read_back_over_rest() {
        let t = testing::test_app().await;
        let app = &t.app;

        let (status, created) = send(
            app,
            json_req(
                "POST",
                "/users",
                None,
                json!({ "email": "apple@gmail.com", "password": "hello-kitty", "dateOfBirth": "10/23/2006" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.get("password").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        let (status, err) = send(app, get_req("/users", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(err["name"], "NotAuthenticated");

        let (status, auth) = send(
            app,
            json_req(
                "POST",
                "/authentication",
                None,
                json!({ "strategy": "local", "email": "apple@gmail.com", "password": "hello-kitty" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = auth["accessToken"].as_str().unwrap().to_string();

        let (status, page) = send(app, get_req("/users?$limit=1", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["limit"], 1);
        assert!(page["data"][0].get("password").is_none());

        let (status, patched) = send(
            app,
            json_req(
                "PATCH",
                &format!("/users/{id}"),
                Some(&token),
                json!({ "$push": { "hobbies": { "$each": ["singing", "shopping"] } } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["hobbies"], json!(["singing", "shopping"]));

        let (status, _) = send(app, json_req("PUT", "/users", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_routes_answer_the_not_found_error() {
        let t = testing::test_app().await;
        let (status, body) = send(&t.app, get_req("/nope?x=1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Page not found");
        assert_eq!(body["data"]["url"], "/nope?x=1");
        assert_eq!(body["className"], "not-found");
    }

    #[tokio::test]
    async fn known_paths_with_unserved_methods_answer_the_not_found_error() {
        let t = testing::test_app().await;
        for (method, uri) in [("POST", "/users/abc"), ("PATCH", "/health"), ("POST", "/ws")] {
            let res = t
                .app
                .router()
                .oneshot(json_req(method, uri, None, json!({ "email": "x@y.z" })))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["name"], "NotFound");
            assert_eq!(body["code"], 404);
            assert_eq!(body["data"]["url"], uri);
        }
    }

    #[tokio::test]
    async fn responses_are_gzipped_on_request() {
        let t = testing::test_app().await;
        let req = Request::builder()
            .uri("/nope")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let res = t.app.router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()[header::CONTENT_ENCODING], "gzip");

        let res = t.app.router().oneshot(get_req("/nope", None)).await.unwrap();
        assert!(res.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn responses_carry_security_headers_and_static_files() {
        let t = testing::test_app().await;
        let res = t.app.router().oneshot(get_req("/", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(res.headers()["x-frame-options"], "SAMEORIGIN");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("roster"));

        let res = t.app.router().oneshot(get_req("/favicon.ico", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let (status, health) = send(&t.app, get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
    }
}
