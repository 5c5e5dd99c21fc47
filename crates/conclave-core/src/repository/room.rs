//! Room repository trait definition.
//!
//! Covers rooms and their message history. The infrastructure layer
//! (conclave-infra) implements this trait with SQLite persistence and an
//! FTS5 index for message search.

use conclave_types::error::RepositoryError;
use conclave_types::message::{MessageQuery, RoomMessage};
use conclave_types::room::Room;
use uuid::Uuid;

/// Repository trait for room and message persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RoomRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Insert or replace a room.
    fn put_room(
        &self,
        room: &Room,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_room(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Room>, RepositoryError>> + Send;

    /// All rooms ordered by creation time.
    fn list_rooms(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Room>, RepositoryError>> + Send;

    /// Delete a room and its history. Returns `true` if the room existed.
    fn delete_room(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Persist a new message. Returns `Conflict` if `(room_id, seq)` is taken.
    fn put_message(
        &self,
        message: &RoomMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the content and edit timestamp of an existing message.
    fn update_message(
        &self,
        message: &RoomMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_message(
        &self,
        room_id: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RoomMessage>, RepositoryError>> + Send;

    /// Page through a room's history, ascending by sequence number.
    fn query_messages(
        &self,
        room_id: &str,
        query: &MessageQuery,
    ) -> impl std::future::Future<Output = Result<Vec<RoomMessage>, RepositoryError>> + Send;

    /// Highest persisted message sequence number in a room (0 if none).
    fn last_message_seq(
        &self,
        room_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Soft-mark every message of a room as archived.
    fn archive_messages(
        &self,
        room_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
