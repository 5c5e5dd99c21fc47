//! Role card repository trait definition.
//!
//! Stores the two writable override layers per bot and pending proposals.
//! Built-in defaults live in code and are never persisted.

use conclave_types::error::RepositoryError;
use conclave_types::role_card::{
    ProposalStatus, RoleCardLayer, RoleCardOverrides, RoleCardProposal, RoleCardScope,
};
use uuid::Uuid;

/// Repository trait for role-card overrides and proposals.
pub trait RoleCardRepository: Send + Sync {
    /// Insert or replace the override layer of a bot at a writable scope.
    fn put_override(
        &self,
        bot_id: &str,
        scope: RoleCardScope,
        layer: &RoleCardLayer,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The stored override layers of a bot (both absent if none).
    fn get_layers(
        &self,
        bot_id: &str,
    ) -> impl std::future::Future<Output = Result<RoleCardOverrides, RepositoryError>> + Send;

    /// Ids of every bot with at least one stored override.
    fn list_overridden_bots(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;

    fn put_proposal(
        &self,
        proposal: &RoleCardProposal,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_proposal(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RoleCardProposal>, RepositoryError>> + Send;

    /// Proposals, newest first, optionally narrowed by bot and status.
    fn list_proposals(
        &self,
        bot_id: Option<&str>,
        status: Option<ProposalStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<RoleCardProposal>, RepositoryError>> + Send;
}
