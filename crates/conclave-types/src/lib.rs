//! Shared domain types for Conclave.
//!
//! This crate contains the domain types used across the workspace: rooms,
//! messages, bots, role cards, action descriptors, escalations, room events
//! and their associated error types.
//!
//! Zero infrastructure dependencies: only serde, uuid, chrono and thiserror.

pub mod action;
pub mod bot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod event;
pub mod invocation;
pub mod message;
pub mod role_card;
pub mod room;
