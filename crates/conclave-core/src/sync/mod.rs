//! Room synchronization: event fan-out, subscriptions, inbound normalization.

pub mod adapter;
pub mod bus;
pub mod inbound;
pub mod sequence;
pub mod subscription;

pub use adapter::{InterfaceAdapter, pump};
pub use bus::SyncBus;
pub use inbound::{InboundNormalizer, Normalized};
pub use sequence::{Observation, SequenceTracker};
pub use subscription::{RoomStream, SnapshotSource, subscribe};
