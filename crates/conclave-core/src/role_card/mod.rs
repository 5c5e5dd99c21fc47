//! Role Card Store: three-layer role cards (workspace > global > built-in).

pub mod builtin;
pub mod merge;
pub mod store;

pub use store::{RoleCardLayers, RoleCardStore};
