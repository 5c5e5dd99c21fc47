//! Room orchestration and constraint enforcement for Conclave.
//!
//! This crate defines the repository traits ("ports") the infrastructure
//! layer implements, plus the engine built on them: role cards, the
//! constraint engine, the room registry, the dispatcher, escalations and
//! the synchronization bus. It depends only on `conclave-types`, never on
//! `conclave-infra` or any database/IO crate.

pub mod constraint;
pub mod dispatch;
pub mod escalation;
pub mod repository;
pub mod role_card;
pub mod room;
pub mod runtime;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use runtime::{Conclave, Snapshots};
