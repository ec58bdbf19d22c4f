//! Seedcast Web - HTTP control plane

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Plain-text endpoints that drive one distribution session from the origin,
//! plus the seed-management endpoints used to create, seed and fetch
//! descriptors through the configured storage backend.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::{ApiError, ServerError};
pub use server::{AppState, build_router, run_server};
