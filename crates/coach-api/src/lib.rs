//! Coach API crate - axum HTTP server for the AI coach.
//!
//! Exposes the coach endpoint in buffered and streamed form behind bearer
//! token authentication, plus a public health check.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::IdentityProvider;
pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
