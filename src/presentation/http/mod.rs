pub mod auth;
pub mod body;
pub mod error;
pub mod fallback;
pub mod health;
pub mod middleware;
pub mod rest;
