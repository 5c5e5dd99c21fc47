//! Role Card Store: layered loading, validated saves and proposals.

use chrono::Utc;
use conclave_types::bot::BotProfile;
use conclave_types::error::RoleCardError;
use conclave_types::role_card::{
    ProposalStatus, RoleCard, RoleCardLayer, RoleCardProposal, RoleCardScope,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::constraint::matcher::validate_pattern;
use crate::repository::role_card::RoleCardRepository;

use super::builtin::{builtin_card, builtin_profiles, BUILTIN_BOT_IDS};
use super::merge::merge_layers;

/// The raw layers of one bot, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleCardLayers {
    pub workspace: Option<RoleCardLayer>,
    pub global: Option<RoleCardLayer>,
    pub builtin: Option<RoleCardLayer>,
}

impl RoleCardLayers {
    pub fn merged(&self, bot_id: &str) -> Option<RoleCard> {
        merge_layers(
            bot_id,
            &[self.workspace.as_ref(), self.global.as_ref(), self.builtin.as_ref()],
        )
    }
}

/// Loads merged role cards and persists overrides and proposals.
///
/// Merged cards are cached for the process lifetime; every successful save
/// or approval invalidates the affected bot's entry.
pub struct RoleCardStore<C: RoleCardRepository> {
    repo: C,
    cache: DashMap<String, RoleCard>,
    /// Bumped by every save. A load only fills the cache if no save landed
    /// while it was reading.
    generations: DashMap<String, u64>,
    /// Serializes proposal decisions so a proposal is decided at most once.
    decisions: Mutex<()>,
}

impl<C: RoleCardRepository> RoleCardStore<C> {
    pub fn new(repo: C) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
            generations: DashMap::new(),
            decisions: Mutex::new(()),
        }
    }

    /// Merged role card of a bot.
    ///
    /// Fails with `Configuration` only when no layer, built-in included,
    /// defines the bot.
    pub async fn load(&self, bot_id: &str) -> Result<RoleCard, RoleCardError> {
        if let Some(card) = self.cache.get(bot_id) {
            return Ok(card.clone());
        }

        let generation = self.generation(bot_id);
        let card = self
            .layers(bot_id)
            .await?
            .merged(bot_id)
            .ok_or_else(|| RoleCardError::Configuration(bot_id.to_string()))?;

        // Holding the entry keeps a concurrent save from bumping between the
        // check and the insert.
        let current = self.generations.entry(bot_id.to_string()).or_default();
        if *current == generation {
            self.cache.insert(bot_id.to_string(), card.clone());
        }
        drop(current);
        Ok(card)
    }

    fn generation(&self, bot_id: &str) -> u64 {
        self.generations.get(bot_id).map(|g| *g).unwrap_or(0)
    }

    /// The raw layers of a bot, for inspection.
    pub async fn layers(&self, bot_id: &str) -> Result<RoleCardLayers, RoleCardError> {
        let overrides = self.repo.get_layers(bot_id).await?;
        Ok(RoleCardLayers {
            workspace: overrides.workspace,
            global: overrides.global,
            builtin: builtin_card(bot_id).map(|c| c.to_layer()),
        })
    }

    /// Persist a full role card as the override at `scope`.
    pub async fn save(&self, card: &RoleCard, scope: RoleCardScope) -> Result<(), RoleCardError> {
        self.save_layer(&card.bot_id, &card.to_layer(), scope).await
    }

    /// Persist a partial override at `scope`, replacing the stored one.
    pub async fn save_layer(
        &self,
        bot_id: &str,
        layer: &RoleCardLayer,
        scope: RoleCardScope,
    ) -> Result<(), RoleCardError> {
        if !scope.is_writable() {
            return Err(RoleCardError::Invalid(format!(
                "scope '{scope}' is read-only"
            )));
        }
        validate_bot_id(bot_id)?;
        validate_layer(layer)?;

        self.repo.put_override(bot_id, scope, layer).await?;
        *self.generations.entry(bot_id.to_string()).or_default() += 1;
        self.cache.remove(bot_id);

        tracing::info!(%bot_id, %scope, "role card override saved");
        Ok(())
    }

    /// Store a pending change proposed by a bot. It has no effect until a
    /// human approves it.
    pub async fn propose_update(
        &self,
        bot_id: &str,
        changes: RoleCardLayer,
        reason: &str,
        proposed_by: &str,
    ) -> Result<RoleCardProposal, RoleCardError> {
        // Unknown bots cannot propose anything.
        self.load(bot_id).await?;

        if changes.is_empty() {
            return Err(RoleCardError::Invalid("proposal changes nothing".to_string()));
        }
        validate_layer(&changes)?;

        let proposal = RoleCardProposal {
            id: Uuid::now_v7(),
            bot_id: bot_id.to_string(),
            changes,
            reason: reason.to_string(),
            proposed_by: proposed_by.to_string(),
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            applied_scope: None,
        };
        self.repo.put_proposal(&proposal).await?;

        tracing::info!(%bot_id, proposal_id = %proposal.id, "role card update proposed");
        Ok(proposal)
    }

    pub async fn list_proposals(
        &self,
        bot_id: Option<&str>,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<RoleCardProposal>, RoleCardError> {
        Ok(self.repo.list_proposals(bot_id, status).await?)
    }

    pub async fn get_proposal(&self, id: &Uuid) -> Result<RoleCardProposal, RoleCardError> {
        self.repo
            .get_proposal(id)
            .await?
            .ok_or_else(|| RoleCardError::ProposalNotFound(id.to_string()))
    }

    /// Apply a pending proposal over the existing override at `scope`.
    pub async fn approve_proposal(
        &self,
        id: &Uuid,
        scope: RoleCardScope,
        approver: &str,
    ) -> Result<RoleCardProposal, RoleCardError> {
        let _guard = self.decisions.lock().await;
        let mut proposal = self.pending_proposal(id).await?;

        let overrides = self.repo.get_layers(&proposal.bot_id).await?;
        let existing = match scope {
            RoleCardScope::Workspace => overrides.workspace,
            RoleCardScope::Global => overrides.global,
            RoleCardScope::BuiltIn => None,
        }
        .unwrap_or_default();
        let updated = existing.overlay(&proposal.changes);

        self.save_layer(&proposal.bot_id, &updated, scope).await?;

        proposal.status = ProposalStatus::Approved;
        proposal.decided_at = Some(Utc::now());
        proposal.decided_by = Some(approver.to_string());
        proposal.applied_scope = Some(scope);
        self.repo.put_proposal(&proposal).await?;

        tracing::info!(proposal_id = %id, bot_id = %proposal.bot_id, %scope, %approver, "proposal approved");
        Ok(proposal)
    }

    pub async fn reject_proposal(
        &self,
        id: &Uuid,
        decider: &str,
    ) -> Result<RoleCardProposal, RoleCardError> {
        let _guard = self.decisions.lock().await;
        let mut proposal = self.pending_proposal(id).await?;

        proposal.status = ProposalStatus::Rejected;
        proposal.decided_at = Some(Utc::now());
        proposal.decided_by = Some(decider.to_string());
        self.repo.put_proposal(&proposal).await?;

        tracing::info!(proposal_id = %id, %decider, "proposal rejected");
        Ok(proposal)
    }

    async fn pending_proposal(&self, id: &Uuid) -> Result<RoleCardProposal, RoleCardError> {
        let proposal = self.get_proposal(id).await?;
        if proposal.status != ProposalStatus::Pending {
            return Err(RoleCardError::ProposalClosed {
                id: id.to_string(),
                status: proposal.status.to_string(),
            });
        }
        Ok(proposal)
    }

    /// Every known bot: the built-in roster followed by bots that exist only
    /// through overrides.
    pub async fn roster(&self) -> Result<Vec<BotProfile>, RoleCardError> {
        let mut profiles = builtin_profiles();

        let mut extra = self.repo.list_overridden_bots().await?;
        extra.retain(|id| !BUILTIN_BOT_IDS.contains(&id.as_str()));
        extra.sort();
        for bot_id in extra {
            match self.load(&bot_id).await {
                Ok(card) => profiles.push(BotProfile {
                    id: card.bot_id,
                    display_name: card.display_name,
                    description: card.domain,
                    coordinator: false,
                }),
                Err(e) => tracing::warn!(%bot_id, error = %e, "skipping unloadable bot"),
            }
        }

        Ok(profiles)
    }

    /// Whether any layer defines the bot.
    pub async fn is_known_bot(&self, bot_id: &str) -> Result<bool, RoleCardError> {
        match self.load(bot_id).await {
            Ok(_) => Ok(true),
            Err(RoleCardError::Configuration(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn validate_bot_id(bot_id: &str) -> Result<(), RoleCardError> {
    let valid = !bot_id.is_empty()
        && bot_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RoleCardError::Invalid(format!(
            "bot id '{bot_id}' must be lowercase letters, digits, '-' or '_'"
        )))
    }
}

/// Reject layers whose ban or trigger lists contradict themselves.
pub fn validate_layer(layer: &RoleCardLayer) -> Result<(), RoleCardError> {
    if let Some(bans) = &layer.hard_bans {
        for (i, ban) in bans.iter().enumerate() {
            if ban.id.trim().is_empty() {
                return Err(RoleCardError::Invalid("hard ban with an empty id".to_string()));
            }
            validate_pattern(&ban.pattern)
                .map_err(|e| RoleCardError::Invalid(format!("hard ban '{}': {e}", ban.id)))?;
            if let Some(dup) = bans[..i]
                .iter()
                .find(|b| b.id == ban.id || (b.pattern == ban.pattern && b.reason == ban.reason))
            {
                return Err(RoleCardError::Invalid(format!(
                    "hard ban '{}' duplicates '{}'",
                    ban.id, dup.id
                )));
            }
        }
    }

    if let Some(triggers) = &layer.escalation_triggers {
        for (i, trigger) in triggers.iter().enumerate() {
            if trigger.id.trim().is_empty() {
                return Err(RoleCardError::Invalid(
                    "escalation trigger with an empty id".to_string(),
                ));
            }
            validate_pattern(&trigger.pattern).map_err(|e| {
                RoleCardError::Invalid(format!("escalation trigger '{}': {e}", trigger.id))
            })?;
            if let Some(dup) = triggers[..i].iter().find(|t| {
                t.id == trigger.id || (t.pattern == trigger.pattern && t.reason == trigger.reason)
            }) {
                return Err(RoleCardError::Invalid(format!(
                    "escalation trigger '{}' duplicates '{}'",
                    trigger.id, dup.id
                )));
            }
        }
    }

    Ok(())
}
