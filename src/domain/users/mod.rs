pub mod user;

pub use user::{User, UserData, UserPatch, UserValidationError};
