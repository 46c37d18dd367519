//! pgdeck-server: HTTP API over the pgdeck pool manager
//!
//! Connection-profile CRUD plus the profile-scoped actions (test, query,
//! stats, disconnect). Every response uses the `{success, data|error,
//! timestamp}` envelope.

pub mod http;

pub use http::{build_router, run_server, ApiError, AppState, ServerConfig, ServerError};
