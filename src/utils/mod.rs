pub mod error;
pub mod jwt;
pub mod text;

pub use error::{ApiError, ApiResult};
pub use jwt::JwtUtil;
