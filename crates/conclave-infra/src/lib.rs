//! Infrastructure layer for Conclave.
//!
//! Contains implementations of the ports defined in `conclave-core`: SQLite
//! repositories, the HTTP model gateway, and configuration loading.

pub mod config;
pub mod gateway;
pub mod sqlite;
