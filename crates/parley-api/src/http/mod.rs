//! HTTP/REST API layer for Parley.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format,
//! SSE streaming for chat turns, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
