// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! HTTP/SSE surface for the procedural-memory execution core: the
//! public workflow API, the registry protocol, and discovery/resolver
//! endpoints, all backed by one [`state::AppState`].

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod tool_executor;

pub use error::ApiError;
pub use routes::build_app;
pub use state::AppState;
