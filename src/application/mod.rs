pub mod channels;
pub mod errors;
pub mod hooks;
pub mod ports;
pub mod query;
pub mod registry;
pub mod service;
pub mod services;
pub mod use_cases;
