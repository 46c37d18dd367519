//! HTTP layer
//!
//! Axum server with:
//! - CORS (localhost only by default)
//! - Request tracing and a request timeout
//! - Graceful shutdown that drains every connection pool
//! - JSON error responses

pub mod error;
pub mod extractors;
pub mod response;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use response::ApiResponse;
pub use server::{build_router, run_server, AppState, ServerConfig, ServerError};
