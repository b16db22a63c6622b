pub mod auth;

pub use auth::{AuthState, AuthUser, auth_middleware};
