//! HTTP API module.
//!
//! Exposes the authentication endpoints consumed by the console frontend.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
