//! In-memory adapters and fixtures shared by unit tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::application::ports::database_port::{DatabaseConnector, DatabasePort};
use crate::application::ports::user_repository::{
    UserFilter, UserListQuery, UserRepository, UserSortField, WriteOutcome,
};
use crate::application::query::SortOrder;
use crate::bootstrap::app::{App, compose};
use crate::bootstrap::config::{Config, DatabaseSettings};
use crate::domain::users::{User, UserData};
use crate::infrastructure::crypto;

/// Users kept in insertion order.
#[derive(Default)]
pub struct MemoryUsers {
    rows: Mutex<Vec<User>>,
}

fn compare(a: &User, b: &User, field: UserSortField) -> Ordering {
    match field {
        UserSortField::Id => a.id.cmp(&b.id),
        UserSortField::Email => a.email.cmp(&b.email),
        UserSortField::DateOfBirth => a.date_of_birth.cmp(&b.date_of_birth),
        UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        UserSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}

#[async_trait]
impl UserRepository for MemoryUsers {
    async fn insert(&self, user: &User) -> anyhow::Result<WriteOutcome> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|u| u.id == user.id || u.email == user.email) {
            return Ok(WriteOutcome::Duplicate);
        }
        rows.push(user.clone());
        Ok(WriteOutcome::Written)
    }

    async fn replace(&self, user: &User) -> anyhow::Result<WriteOutcome> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|u| u.id != user.id && u.email == user.email) {
            return Ok(WriteOutcome::Duplicate);
        }
        match rows.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(WriteOutcome::Written)
            }
            None => Ok(WriteOutcome::NotFound),
        }
    }

    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<User>> {
        Ok(self.rows.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn list(&self, query: &UserListQuery) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|u| query.filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|(field, order)| match order {
                    SortOrder::Asc => compare(a, b, *field),
                    SortOrder::Desc => compare(b, a, *field),
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        let users = users.into_iter().skip(query.skip);
        Ok(match query.limit {
            Some(limit) => users.take(limit).collect(),
            None => users.collect(),
        })
    }

    async fn count(&self, filter: &UserFilter) -> anyhow::Result<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|u| filter.matches(u))
            .count() as u64)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|u| u.id != id);
        Ok(rows.len() != before)
    }
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    users: Arc<MemoryUsers>,
}

#[async_trait]
impl DatabasePort for MemoryDatabase {
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn users(&self) -> Arc<dyn UserRepository> {
        self.users.clone()
    }
}

#[async_trait]
impl DatabaseConnector for MemoryDatabase {
    async fn connect(&self, _settings: &DatabaseSettings) -> anyhow::Result<Arc<dyn DatabasePort>> {
        Ok(Arc::new(self.clone()))
    }
}

/// A connector whose database is unreachable.
pub struct UnreachableDatabase;

#[async_trait]
impl DatabaseConnector for UnreachableDatabase {
    async fn connect(&self, settings: &DatabaseSettings) -> anyhow::Result<Arc<dyn DatabasePort>> {
        anyhow::bail!("connection refused: {}", settings.url)
    }
}

pub async fn seed_user(db: &MemoryDatabase, email: &str, password: &str) -> User {
    let data = UserData {
        id: None,
        email: email.to_string(),
        password: crypto::hash_password(password).unwrap(),
        date_of_birth: None,
        hobbies: Vec::new(),
    };
    let user = User::from_data(data, Utc::now());
    assert_eq!(db.users().insert(&user).await.unwrap(), WriteOutcome::Written);
    user
}

pub fn config() -> Config {
    config_with(&[])
}

/// Test configuration; `vars` override the defaults.
pub fn config_with(vars: &[(&str, &str)]) -> Config {
    let mut map: HashMap<String, String> = HashMap::from([
        (
            "AUTH_SECRET".to_string(),
            "unit-test-secret-of-sufficient-length".to_string(),
        ),
        ("PUBLIC_DIR".to_string(), "./public".to_string()),
    ]);
    for (k, v) in vars {
        map.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| map.get(key).cloned()).unwrap()
}

/// A fully composed application over an in-memory database and a throwaway
/// public directory holding `favicon.ico` and `index.html`.
pub struct TestApp {
    pub app: App,
    pub db: MemoryDatabase,
    _public: tempfile::TempDir,
}

pub async fn test_app() -> TestApp {
    let public = tempfile::tempdir().unwrap();
    std::fs::write(public.path().join("favicon.ico"), [0u8, 0, 1, 0, 1, 0]).unwrap();
    std::fs::write(public.path().join("index.html"), "<h1>roster</h1>").unwrap();
    let db = MemoryDatabase::default();
    let cfg = config_with(&[("PUBLIC_DIR", public.path().to_str().unwrap())]);
    let app = match compose(cfg, &db).await {
        Ok(app) => app,
        Err(e) => panic!("test app failed to compose: {e}"),
    };
    TestApp {
        app,
        db,
        _public: public,
    }
}
