//! Escalation Manager.

pub mod manager;

pub use manager::EscalationManager;
