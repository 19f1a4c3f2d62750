pub mod database_port;
pub mod user_repository;
