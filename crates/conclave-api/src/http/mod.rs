//! HTTP/REST API layer for Conclave.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format,
//! CORS support and a per-room WebSocket for live room activity.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
