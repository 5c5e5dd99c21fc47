//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (conclave-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod escalation;
pub mod role_card;
pub mod room;
