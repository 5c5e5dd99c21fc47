//! SQLite room repository implementation.
//!
//! Implements `RoomRepository` from `conclave-core`. Rooms and messages live
//! in two tables; message content is mirrored into an FTS5 index by
//! triggers, so full-text search never needs application-side bookkeeping.

use conclave_core::repository::room::RoomRepository;
use conclave_types::error::RepositoryError;
use conclave_types::message::{MessageKind, MessageQuery, RoomMessage};
use conclave_types::room::{Room, RoomType};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `RoomRepository`.
pub struct SqliteRoomRepository {
    pool: DatabasePool,
}

impl SqliteRoomRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RoomRow {
    id: String,
    name: String,
    room_type: String,
    participants: String,
    owner: String,
    summary: String,
    archived: bool,
    last_seq: i64,
    created_at: String,
    updated_at: String,
}

impl RoomRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            room_type: row.try_get("room_type")?,
            participants: row.try_get("participants")?,
            owner: row.try_get("owner")?,
            summary: row.try_get("summary")?,
            archived: row.try_get("archived")?,
            last_seq: row.try_get("last_seq")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_room(self) -> Result<Room, RepositoryError> {
        let room_type: RoomType = self
            .room_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let participants: Vec<String> = serde_json::from_str(&self.participants)
            .map_err(|e| RepositoryError::Query(format!("invalid participants JSON: {e}")))?;

        Ok(Room {
            id: self.id,
            name: self.name,
            room_type,
            participants,
            owner: self.owner,
            summary: self.summary,
            archived: self.archived,
            last_seq: self.last_seq.max(0) as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    room_id: String,
    seq: i64,
    content: String,
    kind: String,
    sender_id: String,
    sender_is_bot: bool,
    created_at: String,
    reply_to: Option<String>,
    edited_at: Option<String>,
    metadata: String,
    archived: bool,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            seq: row.try_get("seq")?,
            content: row.try_get("content")?,
            kind: row.try_get("kind")?,
            sender_id: row.try_get("sender_id")?,
            sender_is_bot: row.try_get("sender_is_bot")?,
            created_at: row.try_get("created_at")?,
            reply_to: row.try_get("reply_to")?,
            edited_at: row.try_get("edited_at")?,
            metadata: row.try_get("metadata")?,
            archived: row.try_get("archived")?,
        })
    }

    fn into_message(self) -> Result<RoomMessage, RepositoryError> {
        let kind: MessageKind = self
            .kind
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let metadata: serde_json::Value = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;

        Ok(RoomMessage {
            id: parse_uuid(&self.id)?,
            room_id: self.room_id,
            seq: self.seq.max(0) as u64,
            content: self.content,
            kind,
            sender_id: self.sender_id,
            sender_is_bot: self.sender_is_bot,
            created_at: parse_datetime(&self.created_at)?,
            reply_to: self.reply_to.as_deref().map(parse_uuid).transpose()?,
            edited_at: self.edited_at.as_deref().map(parse_datetime).transpose()?,
            metadata,
            archived: self.archived,
        })
    }
}

fn rows_to_messages(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<RoomMessage>, RepositoryError> {
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let r = MessageRow::from_row(row).map_err(query_error)?;
        messages.push(r.into_message()?);
    }
    Ok(messages)
}

/// Turn free text into an FTS5 query: every term must appear, as a prefix.
/// Terms are quoted so user input can never be parsed as FTS syntax.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

// ---------------------------------------------------------------------------
// RoomRepository impl
// ---------------------------------------------------------------------------

impl RoomRepository for SqliteRoomRepository {
    async fn put_room(&self, room: &Room) -> Result<(), RepositoryError> {
        let participants = serde_json::to_string(&room.participants).map_err(query_error)?;

        // Upsert, never REPLACE: a replace deletes the row first and would
        // cascade into the room's messages.
        sqlx::query(
            r#"INSERT INTO rooms
               (id, name, room_type, participants, owner, summary, archived, last_seq, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 room_type = excluded.room_type,
                 participants = excluded.participants,
                 owner = excluded.owner,
                 summary = excluded.summary,
                 archived = excluded.archived,
                 last_seq = excluded.last_seq,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(room.room_type.to_string())
        .bind(&participants)
        .bind(&room.owner)
        .bind(&room.summary)
        .bind(room.archived)
        .bind(room.last_seq as i64)
        .bind(format_datetime(&room.created_at))
        .bind(format_datetime(&room.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(RoomRow::from_row(&row).map_err(query_error)?.into_room()?)),
            None => Ok(None),
        }
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM rooms ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut rooms = Vec::with_capacity(rows.len());
        for row in &rows {
            rooms.push(RoomRow::from_row(row).map_err(query_error)?.into_room()?);
        }
        Ok(rooms)
    }

    async fn delete_room(&self, id: &str) -> Result<bool, RepositoryError> {
        // Messages go with the room (ON DELETE CASCADE), and the FTS rows
        // with the messages (delete trigger).
        let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&message.metadata).map_err(query_error)?;

        let result = sqlx::query(
            r#"INSERT INTO room_messages
               (id, room_id, seq, content, kind, sender_id, sender_is_bot, created_at,
                reply_to, edited_at, metadata, archived)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(&message.room_id)
        .bind(message.seq as i64)
        .bind(&message.content)
        .bind(message.kind.to_string())
        .bind(&message.sender_id)
        .bind(message.sender_is_bot)
        .bind(format_datetime(&message.created_at))
        .bind(message.reply_to.map(|id| id.to_string()))
        .bind(message.edited_at.as_ref().map(format_datetime))
        .bind(&metadata)
        .bind(message.archived)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                Err(RepositoryError::Conflict(format!(
                    "seq {} already used in room '{}'",
                    message.seq, message.room_id
                )))
            }
            Err(e) => Err(query_error(e)),
        }
    }

    async fn update_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE room_messages SET content = ?, edited_at = ? WHERE id = ? AND room_id = ?",
        )
        .bind(&message.content)
        .bind(message.edited_at.as_ref().map(format_datetime))
        .bind(message.id.to_string())
        .bind(&message.room_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_message(&self, room_id: &str, id: &Uuid) -> Result<Option<RoomMessage>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM room_messages WHERE room_id = ? AND id = ?")
            .bind(room_id)
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(MessageRow::from_row(&row).map_err(query_error)?.into_message()?)),
            None => Ok(None),
        }
    }

    async fn query_messages(
        &self,
        room_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<RoomMessage>, RepositoryError> {
        let mut sql = String::from("SELECT m.* FROM room_messages m WHERE m.room_id = ?");
        if query.before_seq.is_some() {
            sql.push_str(" AND m.seq < ?");
        }
        if query.after_seq.is_some() {
            sql.push_str(" AND m.seq > ?");
        }
        let fts = query.text.as_deref().and_then(fts_query);
        if fts.is_some() {
            sql.push_str(
                " AND m.rowid IN (SELECT rowid FROM room_messages_fts WHERE room_messages_fts MATCH ?)",
            );
        }

        // Oldest first when paging forward from `after_seq`, newest first
        // otherwise; either way the result is returned ascending.
        let forward = query.after_seq.is_some() && query.before_seq.is_none();
        sql.push_str(if forward {
            " ORDER BY m.seq ASC LIMIT ?"
        } else {
            " ORDER BY m.seq DESC LIMIT ?"
        });

        let mut q = sqlx::query(&sql).bind(room_id);
        if let Some(before) = query.before_seq {
            q = q.bind(before as i64);
        }
        if let Some(after) = query.after_seq {
            q = q.bind(after as i64);
        }
        if let Some(fts) = &fts {
            q = q.bind(fts);
        }
        let rows = q
            .bind(query.effective_limit() as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut messages = rows_to_messages(&rows)?;
        if !forward {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn last_message_seq(&self, room_id: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS last_seq FROM room_messages WHERE room_id = ?")
            .bind(room_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        let last_seq: i64 = row.try_get("last_seq").map_err(query_error)?;
        Ok(last_seq.max(0) as u64)
    }

    async fn archive_messages(&self, room_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE room_messages SET archived = 1 WHERE room_id = ? AND archived = 0")
            .bind(room_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}
