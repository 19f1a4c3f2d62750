#[allow(clippy::module_inception)]
pub mod ws;

pub use ws::{routes, ws_entry};
