// Module layout (Clean Architecture style)
// - bootstrap: configuration and the ordered composition root
// - infrastructure: database and crypto adapters
// - presentation: HTTP middleware, REST and WebSocket transports
// - application: services, hooks, channels and ports
// - domain: core models

pub mod application;
pub mod bootstrap;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

#[cfg(test)]
mod testing;
