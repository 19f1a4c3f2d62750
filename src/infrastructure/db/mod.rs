use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::application::ports::database_port::{DatabaseConnector, DatabasePort};
use crate::application::ports::user_repository::UserRepository;
use crate::bootstrap::config::DatabaseSettings;
use crate::infrastructure::db::repositories::user_repository_sqlx::SqlxUserRepository;

pub type PgPool = Pool<Postgres>;

pub async fn connect_pool(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    // Uses compile-time embedded migrations under ./migrations
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub struct SqlxDatabase {
    pool: PgPool,
    users: Arc<SqlxUserRepository>,
}

impl SqlxDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: Arc::new(SqlxUserRepository::new(pool.clone())),
            pool,
        }
    }
}

#[async_trait]
impl DatabasePort for SqlxDatabase {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    fn users(&self) -> Arc<dyn UserRepository> {
        self.users.clone()
    }
}

/// Connects the Postgres pool and applies pending migrations.
pub struct SqlxConnector;

#[async_trait]
impl DatabaseConnector for SqlxConnector {
    async fn connect(&self, settings: &DatabaseSettings) -> anyhow::Result<Arc<dyn DatabasePort>> {
        let pool = connect_pool(settings).await?;
        migrate(&pool).await?;
        tracing::info!(max_connections = settings.max_connections, "database_connected");
        Ok(Arc::new(SqlxDatabase::new(pool)))
    }
}

pub mod repositories;
