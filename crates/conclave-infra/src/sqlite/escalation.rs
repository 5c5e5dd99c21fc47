//! SQLite escalation repository implementation.
//!
//! State transitions are a single conditional UPDATE, so the
//! compare-and-set the Escalation Manager relies on holds across processes
//! sharing the database file.

use conclave_core::repository::escalation::EscalationRepository;
use conclave_types::error::RepositoryError;
use conclave_types::escalation::{EscalationFilter, EscalationRecord, ResolutionState};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `EscalationRepository`.
pub struct SqliteEscalationRepository {
    pool: DatabasePool,
}

impl SqliteEscalationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct EscalationRow {
    id: String,
    room_id: String,
    bot_id: Option<String>,
    reason: String,
    trigger_id: String,
    state: String,
    created_at: String,
    acknowledged_by: Option<String>,
    resolved_by: Option<String>,
    resolved_at: Option<String>,
    resolution_note: Option<String>,
}

impl EscalationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            room_id: row.try_get("room_id")?,
            bot_id: row.try_get("bot_id")?,
            reason: row.try_get("reason")?,
            trigger_id: row.try_get("trigger_id")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
            acknowledged_by: row.try_get("acknowledged_by")?,
            resolved_by: row.try_get("resolved_by")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution_note: row.try_get("resolution_note")?,
        })
    }

    fn into_record(self) -> Result<EscalationRecord, RepositoryError> {
        let state: ResolutionState = self
            .state
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(EscalationRecord {
            id: parse_uuid(&self.id)?,
            room_id: self.room_id,
            bot_id: self.bot_id,
            reason: self.reason,
            trigger_id: self.trigger_id,
            state,
            created_at: parse_datetime(&self.created_at)?,
            acknowledged_by: self.acknowledged_by,
            resolved_by: self.resolved_by,
            resolved_at: self.resolved_at.as_deref().map(parse_datetime).transpose()?,
            resolution_note: self.resolution_note,
        })
    }
}

/// SQL condition for a listing filter.
fn filter_condition(filter: EscalationFilter) -> Option<&'static str> {
    match filter {
        EscalationFilter::Pending => Some("state = 'pending'"),
        EscalationFilter::Acknowledged => Some("state = 'acknowledged'"),
        EscalationFilter::Resolved => Some("state = 'resolved'"),
        EscalationFilter::Open => Some("state != 'resolved'"),
        EscalationFilter::All => None,
    }
}

impl EscalationRepository for SqliteEscalationRepository {
    async fn insert(&self, record: &EscalationRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO escalations
               (id, room_id, bot_id, reason, trigger_id, state, created_at,
                acknowledged_by, resolved_by, resolved_at, resolution_note)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.room_id)
        .bind(&record.bot_id)
        .bind(&record.reason)
        .bind(&record.trigger_id)
        .bind(record.state.to_string())
        .bind(format_datetime(&record.created_at))
        .bind(&record.acknowledged_by)
        .bind(&record.resolved_by)
        .bind(record.resolved_at.as_ref().map(format_datetime))
        .bind(&record.resolution_note)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
                RepositoryError::Conflict(format!("escalation '{}' exists", record.id)),
            ),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get(&self, id: &Uuid) -> Result<Option<EscalationRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM escalations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(EscalationRow::from_row(&row).map_err(query_error)?.into_record()?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: EscalationFilter,
        room_id: Option<&str>,
    ) -> Result<Vec<EscalationRecord>, RepositoryError> {
        let mut conditions: Vec<&str> = Vec::new();
        if let Some(condition) = filter_condition(filter) {
            conditions.push(condition);
        }
        if room_id.is_some() {
            conditions.push("room_id = ?");
        }

        let mut sql = String::from("SELECT * FROM escalations");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut q = sqlx::query(&sql);
        if let Some(room_id) = room_id {
            q = q.bind(room_id);
        }
        let rows = q.fetch_all(&self.pool.reader).await.map_err(query_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(EscalationRow::from_row(row).map_err(query_error)?.into_record()?);
        }
        Ok(records)
    }

    async fn compare_and_update(
        &self,
        record: &EscalationRecord,
        expected: &[ResolutionState],
    ) -> Result<bool, RepositoryError> {
        if expected.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE escalations SET state = ?, acknowledged_by = ?, resolved_by = ?, resolved_at = ?, resolution_note = ?
             WHERE id = ? AND state IN ({placeholders})"
        );

        let mut q = sqlx::query(&sql)
            .bind(record.state.to_string())
            .bind(&record.acknowledged_by)
            .bind(&record.resolved_by)
            .bind(record.resolved_at.as_ref().map(format_datetime))
            .bind(&record.resolution_note)
            .bind(record.id.to_string());
        for state in expected {
            q = q.bind(state.to_string());
        }
        let result = q.execute(&self.pool.writer).await.map_err(query_error)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn test_repo() -> SqliteEscalationRepository {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        SqliteEscalationRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    fn make_record(room_id: &str, minutes_ago: i64) -> EscalationRecord {
        EscalationRecord {
            id: Uuid::now_v7(),
            room_id: room_id.to_string(),
            bot_id: Some("social".into()),
            reason: "Legal or compliance questions need a human decision".into(),
            trigger_id: "legal-or-compliance".into(),
            state: ResolutionState::Pending,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            acknowledged_by: None,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = test_repo().await;
        let record = make_record("general", 0);
        repo.insert(&record).await.unwrap();

        assert_eq!(repo.get(&record.id).await.unwrap(), Some(record.clone()));
        let err = repo.insert(&record).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_filters_newest_first() {
        let repo = test_repo().await;
        let old = make_record("general", 30);
        let new = make_record("general", 1);
        let elsewhere = make_record("launch", 5);
        for r in [&old, &new, &elsewhere] {
            repo.insert(r).await.unwrap();
        }

        let mut resolved = old.clone();
        resolved.state = ResolutionState::Resolved;
        resolved.resolved_by = Some("dana".into());
        resolved.resolved_at = Some(Utc::now());
        assert!(repo
            .compare_and_update(&resolved, &[ResolutionState::Pending])
            .await
            .unwrap());

        let all: Vec<Uuid> = repo
            .list(EscalationFilter::All, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec![new.id, elsewhere.id, old.id]);

        let open = repo.list(EscalationFilter::Open, Some("general")).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, new.id);

        let done = repo.list(EscalationFilter::Resolved, None).await.unwrap();
        assert_eq!(done[0].resolved_by.as_deref(), Some("dana"));
    }

    #[tokio::test]
    async fn test_compare_and_update_requires_expected_state() {
        let repo = test_repo().await;
        let record = make_record("general", 0);
        repo.insert(&record).await.unwrap();

        let mut resolved = record.clone();
        resolved.state = ResolutionState::Resolved;
        resolved.resolved_by = Some("dana".into());

        let open = [ResolutionState::Pending, ResolutionState::Acknowledged];
        assert!(repo.compare_and_update(&resolved, &open).await.unwrap());

        let mut second = record.clone();
        second.state = ResolutionState::Resolved;
        second.resolved_by = Some("eli".into());
        assert!(!repo.compare_and_update(&second, &open).await.unwrap());

        let stored = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.resolved_by.as_deref(), Some("dana"));
    }

    #[tokio::test]
    async fn test_resolution_flow_through_manager() {
        use conclave_core::escalation::EscalationManager;
        use conclave_core::role_card::RoleCardStore;
        use conclave_core::room::RoomRegistry;
        use conclave_core::sync::SyncBus;
        use conclave_core::testing::{InMemoryRoleCardRepository, InMemoryRoomRepository};
        use conclave_types::error::ErrorCode;
        use std::sync::Arc;

        let rooms = Arc::new(RoomRegistry::new(
            InMemoryRoomRepository::new(),
            Arc::new(RoleCardStore::new(InMemoryRoleCardRepository::new())),
            SyncBus::default(),
            "lead",
        ));
        rooms.get_or_create_default().await.unwrap();
        let manager = EscalationManager::new(test_repo().await, rooms);

        let record = manager
            .raise("general", Some("writer"), "contract terms changed", "legal-or-compliance")
            .await
            .unwrap();
        manager.resolve(&record.id, "dana", Some("approved")).await.unwrap();
        let err = manager.resolve(&record.id, "eli", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyResolved);
        assert_eq!(
            manager.get(&record.id).await.unwrap().resolution_note.as_deref(),
            Some("approved")
        );
    }
}
