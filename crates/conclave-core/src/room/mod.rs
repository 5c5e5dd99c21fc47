//! Room Registry.

pub mod registry;

pub use registry::{RoomRegistry, RoomView};
