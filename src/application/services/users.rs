use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::application::errors::ServiceError;
use crate::application::hooks::{Hooks, authenticate, hash_password, protect};
use crate::application::ports::user_repository::{
    UserFilter, UserListQuery, UserRepository, UserSortField, WriteOutcome,
};
use crate::application::query::{Page, Paginate, Query};
use crate::application::service::{Method, Params, Service, ServiceResult};
use crate::domain::users::{User, UserData, UserPatch, UserValidationError};

pub const PATH: &str = "users";

impl From<UserValidationError> for ServiceError {
    fn from(err: UserValidationError) -> Self {
        ServiceError::bad_request(err.to_string())
    }
}

/// `users` hooks: token required for everything but signup, passwords hashed
/// on write and never returned to external callers.
pub fn hooks() -> Hooks {
    Hooks::new()
        .before(
            &[
                Method::Find,
                Method::Get,
                Method::Update,
                Method::Patch,
                Method::Remove,
            ],
            authenticate(&["jwt"]),
        )
        .before(
            &[Method::Create, Method::Update, Method::Patch],
            hash_password("password"),
        )
        .after_all(protect(&["password"]))
}

pub struct UsersService {
    repo: Arc<dyn UserRepository>,
    paginate: Paginate,
}

impl UsersService {
    pub fn new(repo: Arc<dyn UserRepository>, paginate: Paginate) -> Self {
        Self { repo, paginate }
    }

    async fn load(&self, id: &str) -> Result<User, ServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("No record found for id '{id}'")))
    }

    async fn create_one(&self, data: Value) -> Result<User, ServiceError> {
        let data: UserData = serde_json::from_value(data)
            .map_err(|e| ServiceError::bad_request(format!("Invalid user data: {e}")))?;
        data.validate()?;
        let user = User::from_data(data, Utc::now());
        match self.repo.insert(&user).await? {
            WriteOutcome::Written => Ok(user),
            _ => Err(ServiceError::conflict(format!(
                "A user with id '{}' or email '{}' already exists",
                user.id, user.email
            ))),
        }
    }

    async fn save(&self, user: &User) -> Result<(), ServiceError> {
        match self.repo.replace(user).await? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::NotFound => Err(ServiceError::not_found(format!(
                "No record found for id '{}'",
                user.id
            ))),
            WriteOutcome::Duplicate => Err(ServiceError::conflict(format!(
                "Email '{}' is already taken",
                user.email
            ))),
        }
    }

    /// Every user matching `params.query`. Refuses an unfiltered multi operation.
    async fn matching(&self, params: &Params, method: Method) -> Result<Vec<User>, ServiceError> {
        if !params.query.has_filters() {
            return Err(ServiceError::bad_request(format!(
                "Can not {method} multiple entries without a query"
            )));
        }
        let filter = user_filter(&params.query)?;
        Ok(self
            .repo
            .list(&UserListQuery {
                filter,
                ..UserListQuery::default()
            })
            .await?)
    }
}

fn user_filter(query: &Query) -> Result<UserFilter, ServiceError> {
    let mut filter = UserFilter::default();
    for f in &query.filters {
        let slot = match f.field() {
            "id" => &mut filter.ids,
            "email" => &mut filter.emails,
            // an array field: every constraint must hold on its own
            "hobbies" => {
                filter.hobbies.push(f.values());
                continue;
            }
            other => {
                return Err(ServiceError::bad_request(format!(
                    "Invalid query parameter '{other}'"
                )));
            }
        };
        // repeated filters on one field intersect
        let values = f.values();
        *slot = Some(match slot.take() {
            Some(existing) => existing.into_iter().filter(|v| values.contains(v)).collect(),
            None => values,
        });
    }
    Ok(filter)
}

fn list_query(query: &Query, limit: usize) -> Result<UserListQuery, ServiceError> {
    let sort = query
        .sort
        .iter()
        .map(|(field, order)| {
            UserSortField::parse(field)
                .map(|f| (f, *order))
                .ok_or_else(|| ServiceError::bad_request(format!("Invalid sort field '{field}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(UserListQuery {
        filter: user_filter(query)?,
        sort,
        limit: Some(limit),
        skip: query.skip,
    })
}

/// Applies `$select`, always keeping `id`.
fn project(user: &User, select: &[String]) -> Value {
    let mut value = user.to_json();
    if select.is_empty() {
        return value;
    }
    if let Some(obj) = value.as_object_mut() {
        obj.retain(|k, _| k == "id" || select.iter().any(|s| s == k));
    }
    value
}

fn project_all(users: &[User], select: &[String]) -> Value {
    Value::Array(users.iter().map(|u| project(u, select)).collect())
}

#[async_trait]
impl Service for UsersService {
    async fn find(&self, params: &Params) -> ServiceResult {
        let limit = self.paginate.limit(&params.query);
        let query = list_query(&params.query, limit)?;
        let total = self.repo.count(&query.filter).await?;
        let users = if limit == 0 {
            Vec::new()
        } else {
            self.repo.list(&query).await?
        };
        let page = Page {
            total,
            limit,
            skip: query.skip,
            data: users
                .iter()
                .map(|u| project(u, &params.query.select))
                .collect(),
        };
        Ok(serde_json::to_value(page).map_err(anyhow::Error::from)?)
    }

    async fn get(&self, id: &str, params: &Params) -> ServiceResult {
        let user = self.load(id).await?;
        Ok(project(&user, &params.query.select))
    }

    async fn create(&self, data: Value, params: &Params) -> ServiceResult {
        match data {
            Value::Array(items) => {
                let mut created = Vec::with_capacity(items.len());
                for item in items {
                    created.push(self.create_one(item).await?);
                }
                Ok(project_all(&created, &params.query.select))
            }
            item => {
                let user = self.create_one(item).await?;
                Ok(project(&user, &params.query.select))
            }
        }
    }

    async fn update(&self, id: &str, data: Value, params: &Params) -> ServiceResult {
        let data: UserData = serde_json::from_value(data)
            .map_err(|e| ServiceError::bad_request(format!("Invalid user data: {e}")))?;
        data.validate()?;
        let mut user = self.load(id).await?;
        user.replace(data, Utc::now());
        self.save(&user).await?;
        Ok(project(&user, &params.query.select))
    }

    async fn patch(&self, id: Option<&str>, data: Value, params: &Params) -> ServiceResult {
        let patch = UserPatch::from_json(&data)?;
        let now = Utc::now();
        match id {
            Some(id) => {
                let mut user = self.load(id).await?;
                if !user_filter(&params.query)?.matches(&user) {
                    return Err(ServiceError::not_found(format!("No record found for id '{id}'")));
                }
                patch.apply(&mut user, now);
                self.save(&user).await?;
                Ok(project(&user, &params.query.select))
            }
            None => {
                let mut users = self.matching(params, Method::Patch).await?;
                for user in users.iter_mut() {
                    patch.apply(user, now);
                    self.save(user).await?;
                }
                Ok(project_all(&users, &params.query.select))
            }
        }
    }

    async fn remove(&self, id: Option<&str>, params: &Params) -> ServiceResult {
        match id {
            Some(id) => {
                let user = self.load(id).await?;
                if !user_filter(&params.query)?.matches(&user) {
                    return Err(ServiceError::not_found(format!("No record found for id '{id}'")));
                }
                if !self.repo.delete(id).await? {
                    return Err(ServiceError::not_found(format!("No record found for id '{id}'")));
                }
                Ok(project(&user, &params.query.select))
            }
            None => {
                let users = self.matching(params, Method::Remove).await?;
                let mut removed = Vec::with_capacity(users.len());
                for user in users {
                    if self.repo.delete(&user.id).await? {
                        removed.push(user);
                    }
                }
                Ok(project_all(&removed, &params.query.select))
            }
        }
    }
}
