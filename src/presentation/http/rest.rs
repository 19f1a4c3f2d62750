//! REST transport: one collection route and one item route per mounted service.

use axum::{
    Json, Router,
    extract::{FromRequestParts, MatchedPath, Path, Query as QueryString, State},
    http::{StatusCode, request::Parts},
    routing::get,
};
use serde_json::Value;

use crate::application::errors::ServiceError;
use crate::application::query::Query;
use crate::application::registry::normalize_path;
use crate::application::service::{Method, Params, Provider};
use crate::bootstrap::app_context::AppContext;
use crate::presentation::http::auth::Bearer;
use crate::presentation::http::body::Body;
use crate::presentation::http::fallback;

const ID_SEGMENT: &str = "/:id";

type Pairs = QueryString<Vec<(String, String)>>;

/// Service path of the matched route, e.g. `users` for `/users/:id`.
pub struct ServicePath(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ServicePath
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let matched = MatchedPath::from_request_parts(parts, state)
            .await
            .map_err(|_| ServiceError::not_found("Page not found"))?;
        let route = matched.as_str();
        Ok(ServicePath(normalize_path(
            route.strip_suffix(ID_SEGMENT).unwrap_or(route),
        )))
    }
}

pub fn routes(ctx: AppContext) -> Router {
    let mut router = Router::new();
    for path in ctx.registry().paths() {
        router = router
            .route(
                &format!("/{path}"),
                get(find)
                    .post(create)
                    .put(update_collection)
                    .patch(patch_many)
                    .delete(remove_many)
                    .fallback(fallback::not_found),
            )
            .route(
                &format!("/{path}{ID_SEGMENT}"),
                get(get_one)
                    .put(update)
                    .patch(patch)
                    .delete(remove)
                    .fallback(fallback::not_found),
            );
    }
    router.with_state(ctx)
}

fn params(pairs: Vec<(String, String)>, bearer: Option<Bearer>) -> Result<Params, ServiceError> {
    let query = Query::from_pairs(pairs)?;
    Ok(Params::external(Provider::Rest, query, bearer.map(|b| b.0)))
}

pub async fn find(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(ctx.call(&path, Method::Find, None, None, params).await?))
}

pub async fn get_one(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    Path(id): Path<String>,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(ctx.call(&path, Method::Get, Some(id), None, params).await?))
}

pub async fn create(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
    Body(data): Body,
) -> Result<(StatusCode, Json<Value>), ServiceError> {
    let params = params(pairs, bearer)?;
    let created = ctx
        .call(&path, Method::Create, None, Some(data), params)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    Path(id): Path<String>,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
    Body(data): Body,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(
        ctx.call(&path, Method::Update, Some(id), Some(data), params)
            .await?,
    ))
}

pub async fn update_collection() -> ServiceError {
    ServiceError::bad_request("You can not replace multiple instances. Did you mean 'patch'?")
}

pub async fn patch(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    Path(id): Path<String>,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
    Body(data): Body,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(
        ctx.call(&path, Method::Patch, Some(id), Some(data), params)
            .await?,
    ))
}

pub async fn patch_many(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
    Body(data): Body,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(
        ctx.call(&path, Method::Patch, None, Some(data), params)
            .await?,
    ))
}

pub async fn remove(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    Path(id): Path<String>,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(ctx.call(&path, Method::Remove, Some(id), None, params).await?))
}

pub async fn remove_many(
    State(ctx): State<AppContext>,
    ServicePath(path): ServicePath,
    bearer: Option<Bearer>,
    QueryString(pairs): Pairs,
) -> Result<Json<Value>, ServiceError> {
    let params = params(pairs, bearer)?;
    Ok(Json(ctx.call(&path, Method::Remove, None, None, params).await?))
}
