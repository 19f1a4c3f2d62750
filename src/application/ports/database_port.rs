use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::user_repository::UserRepository;
use crate::bootstrap::config::DatabaseSettings;

/// A connected database, exposed to services through its repositories.
#[async_trait]
pub trait DatabasePort: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;
    fn users(&self) -> Arc<dyn UserRepository>;
}

/// Establishes the database session during startup.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, settings: &DatabaseSettings) -> anyhow::Result<Arc<dyn DatabasePort>>;
}
