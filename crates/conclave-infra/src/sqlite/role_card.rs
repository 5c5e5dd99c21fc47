//! SQLite role-card repository implementation.
//!
//! Override layers are stored as JSON documents keyed by `(bot_id, scope)`;
//! the built-in layer is code, never a row.

use chrono::Utc;
use conclave_core::repository::role_card::RoleCardRepository;
use conclave_types::error::RepositoryError;
use conclave_types::role_card::{
    ProposalStatus, RoleCardLayer, RoleCardOverrides, RoleCardProposal, RoleCardScope,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `RoleCardRepository`.
pub struct SqliteRoleCardRepository {
    pool: DatabasePool,
}

impl SqliteRoleCardRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_layer(json: &str) -> Result<RoleCardLayer, RepositoryError> {
    serde_json::from_str(json)
        .map_err(|e| RepositoryError::Query(format!("invalid role card layer JSON: {e}")))
}

struct ProposalRow {
    id: String,
    bot_id: String,
    changes: String,
    reason: String,
    proposed_by: String,
    status: String,
    created_at: String,
    decided_at: Option<String>,
    decided_by: Option<String>,
    applied_scope: Option<String>,
}

impl ProposalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            bot_id: row.try_get("bot_id")?,
            changes: row.try_get("changes")?,
            reason: row.try_get("reason")?,
            proposed_by: row.try_get("proposed_by")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            decided_at: row.try_get("decided_at")?,
            decided_by: row.try_get("decided_by")?,
            applied_scope: row.try_get("applied_scope")?,
        })
    }

    fn into_proposal(self) -> Result<RoleCardProposal, RepositoryError> {
        let status: ProposalStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let applied_scope = self
            .applied_scope
            .as_deref()
            .map(|s| s.parse::<RoleCardScope>().map_err(RepositoryError::Query))
            .transpose()?;

        Ok(RoleCardProposal {
            id: parse_uuid(&self.id)?,
            bot_id: self.bot_id,
            changes: parse_layer(&self.changes)?,
            reason: self.reason,
            proposed_by: self.proposed_by,
            status,
            created_at: parse_datetime(&self.created_at)?,
            decided_at: self.decided_at.as_deref().map(parse_datetime).transpose()?,
            decided_by: self.decided_by,
            applied_scope,
        })
    }
}

impl RoleCardRepository for SqliteRoleCardRepository {
    async fn put_override(
        &self,
        bot_id: &str,
        scope: RoleCardScope,
        layer: &RoleCardLayer,
    ) -> Result<(), RepositoryError> {
        if !scope.is_writable() {
            return Err(RepositoryError::Conflict(format!(
                "the {scope} layer is read-only"
            )));
        }
        let json = serde_json::to_string(layer).map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO role_card_overrides (bot_id, scope, layer, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(bot_id, scope) DO UPDATE SET
                 layer = excluded.layer,
                 updated_at = excluded.updated_at"#,
        )
        .bind(bot_id)
        .bind(scope.to_string())
        .bind(&json)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_layers(&self, bot_id: &str) -> Result<RoleCardOverrides, RepositoryError> {
        let rows = sqlx::query("SELECT scope, layer FROM role_card_overrides WHERE bot_id = ?")
            .bind(bot_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut overrides = RoleCardOverrides::default();
        for row in &rows {
            let scope: String = row.try_get("scope").map_err(query_error)?;
            let layer: String = row.try_get("layer").map_err(query_error)?;
            match scope.parse::<RoleCardScope>().map_err(RepositoryError::Query)? {
                RoleCardScope::Workspace => overrides.workspace = Some(parse_layer(&layer)?),
                RoleCardScope::Global => overrides.global = Some(parse_layer(&layer)?),
                RoleCardScope::BuiltIn => {
                    tracing::warn!(%bot_id, "ignoring stored built-in role card layer");
                }
            }
        }
        Ok(overrides)
    }

    async fn list_overridden_bots(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT DISTINCT bot_id FROM role_card_overrides ORDER BY bot_id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("bot_id").map_err(query_error))
            .collect()
    }

    async fn put_proposal(&self, proposal: &RoleCardProposal) -> Result<(), RepositoryError> {
        let changes = serde_json::to_string(&proposal.changes).map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO role_card_proposals
               (id, bot_id, changes, reason, proposed_by, status, created_at, decided_at, decided_by, applied_scope)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 decided_at = excluded.decided_at,
                 decided_by = excluded.decided_by,
                 applied_scope = excluded.applied_scope"#,
        )
        .bind(proposal.id.to_string())
        .bind(&proposal.bot_id)
        .bind(&changes)
        .bind(&proposal.reason)
        .bind(&proposal.proposed_by)
        .bind(proposal.status.to_string())
        .bind(format_datetime(&proposal.created_at))
        .bind(proposal.decided_at.as_ref().map(format_datetime))
        .bind(&proposal.decided_by)
        .bind(proposal.applied_scope.map(|s| s.to_string()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_proposal(&self, id: &Uuid) -> Result<Option<RoleCardProposal>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM role_card_proposals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(ProposalRow::from_row(&row).map_err(query_error)?.into_proposal()?)),
            None => Ok(None),
        }
    }

    async fn list_proposals(
        &self,
        bot_id: Option<&str>,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RoleCardProposal>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM role_card_proposals");
        let mut conditions: Vec<&str> = Vec::new();
        if bot_id.is_some() {
            conditions.push("bot_id = ?");
        }
        if status.is_some() {
            conditions.push("status = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut q = sqlx::query(&sql);
        if let Some(bot_id) = bot_id {
            q = q.bind(bot_id);
        }
        if let Some(status) = status {
            q = q.bind(status.to_string());
        }
        let rows = q.fetch_all(&self.pool.reader).await.map_err(query_error)?;

        let mut proposals = Vec::with_capacity(rows.len());
        for row in &rows {
            proposals.push(ProposalRow::from_row(row).map_err(query_error)?.into_proposal()?);
        }
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::role_card::RoleCardStore;
    use conclave_types::action::ActionCategory;
    use conclave_types::role_card::{ActionPattern, HardBan};

    async fn test_repo() -> SqliteRoleCardRepository {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        SqliteRoleCardRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    fn ban_layer() -> RoleCardLayer {
        RoleCardLayer {
            domain: Some("Release notes only".into()),
            hard_bans: Some(vec![HardBan {
                id: "no-spend".into(),
                pattern: ActionPattern::category(ActionCategory::Financial),
                reason: "No spending".into(),
                room_types: vec![],
            }]),
            ..Default::default()
        }
    }

    fn make_proposal(bot_id: &str) -> RoleCardProposal {
        RoleCardProposal {
            id: Uuid::now_v7(),
            bot_id: bot_id.to_string(),
            changes: RoleCardLayer {
                metrics: Some(vec!["posts drafted".into()]),
                ..Default::default()
            },
            reason: "track drafts".into(),
            proposed_by: bot_id.to_string(),
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            applied_scope: None,
        }
    }

    #[tokio::test]
    async fn test_override_roundtrip() {
        let repo = test_repo().await;
        repo.put_override("writer", RoleCardScope::Global, &ban_layer())
            .await
            .unwrap();

        let layers = repo.get_layers("writer").await.unwrap();
        assert_eq!(layers.global, Some(ban_layer()));
        assert!(layers.workspace.is_none());

        let replacement = RoleCardLayer {
            domain: Some("Docs".into()),
            ..Default::default()
        };
        repo.put_override("writer", RoleCardScope::Global, &replacement)
            .await
            .unwrap();
        assert_eq!(repo.get_layers("writer").await.unwrap().global, Some(replacement));
    }

    #[tokio::test]
    async fn test_builtin_scope_is_read_only() {
        let repo = test_repo().await;
        let err = repo
            .put_override("writer", RoleCardScope::BuiltIn, &ban_layer())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_overridden_bots_is_distinct() {
        let repo = test_repo().await;
        repo.put_override("writer", RoleCardScope::Global, &ban_layer()).await.unwrap();
        repo.put_override("writer", RoleCardScope::Workspace, &ban_layer()).await.unwrap();
        repo.put_override("archivist", RoleCardScope::Workspace, &ban_layer()).await.unwrap();

        assert_eq!(repo.list_overridden_bots().await.unwrap(), vec!["archivist", "writer"]);
    }

    #[tokio::test]
    async fn test_proposal_lifecycle() {
        let repo = test_repo().await;
        let mut proposal = make_proposal("social");
        repo.put_proposal(&proposal).await.unwrap();
        repo.put_proposal(&make_proposal("coder")).await.unwrap();

        let pending = repo
            .list_proposals(Some("social"), Some(ProposalStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], proposal);

        proposal.status = ProposalStatus::Approved;
        proposal.decided_at = Some(Utc::now());
        proposal.decided_by = Some("dana".into());
        proposal.applied_scope = Some(RoleCardScope::Workspace);
        repo.put_proposal(&proposal).await.unwrap();

        let stored = repo.get_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Approved);
        assert_eq!(stored.applied_scope, Some(RoleCardScope::Workspace));
        assert!(repo
            .list_proposals(None, Some(ProposalStatus::Pending))
            .await
            .unwrap()
            .iter()
            .all(|p| p.bot_id == "coder"));
    }

    #[tokio::test]
    async fn test_store_merges_sqlite_layers() {
        let store = RoleCardStore::new(test_repo().await);
        store
            .save_layer("writer", &ban_layer(), RoleCardScope::Workspace)
            .await
            .unwrap();

        let card = store.load("writer").await.unwrap();
        assert_eq!(card.domain, "Release notes only");
        assert_eq!(card.hard_bans.len(), 1);
        assert_eq!(card.hard_bans[0].id, "no-spend");
        // Fields the override leaves out come from the built-in card.
        assert_eq!(card.display_name, "Writer");
    }
}
