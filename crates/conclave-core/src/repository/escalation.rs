//! Escalation repository trait definition.

use conclave_types::error::RepositoryError;
use conclave_types::escalation::{EscalationFilter, EscalationRecord, ResolutionState};
use uuid::Uuid;

/// Repository trait for escalation records.
///
/// Inserts are append-only. State changes go through a compare-and-set so
/// concurrent resolvers cannot both succeed.
pub trait EscalationRepository: Send + Sync {
    fn insert(
        &self,
        record: &EscalationRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<EscalationRecord>, RepositoryError>> + Send;

    /// Newest first.
    fn list(
        &self,
        filter: EscalationFilter,
        room_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<EscalationRecord>, RepositoryError>> + Send;

    /// Overwrite the record only if its stored state is one of `expected`.
    /// Returns `false` when the stored state did not match (or the record
    /// does not exist).
    fn compare_and_update(
        &self,
        record: &EscalationRecord,
        expected: &[ResolutionState],
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
