//! Built-in role cards for the default bot roster.
//!
//! These are the lowest-priority layer of every role card. Workspace and
//! global overrides replace individual fields; a bot that appears only in an
//! override layer still joins the roster.

use conclave_types::action::ActionCategory;
use conclave_types::bot::BotProfile;
use conclave_types::role_card::{ActionPattern, EscalationTrigger, HardBan, RoleCard};

/// Id of the built-in coordinating bot.
pub const LEAD_BOT_ID: &str = "lead";

pub const RESEARCHER_BOT_ID: &str = "researcher";
pub const CODER_BOT_ID: &str = "coder";
pub const WRITER_BOT_ID: &str = "writer";
pub const SOCIAL_BOT_ID: &str = "social";
pub const ANALYST_BOT_ID: &str = "analyst";

/// Ids of every built-in bot, in roster display order.
pub const BUILTIN_BOT_IDS: [&str; 6] = [
    LEAD_BOT_ID,
    RESEARCHER_BOT_ID,
    CODER_BOT_ID,
    WRITER_BOT_ID,
    SOCIAL_BOT_ID,
    ANALYST_BOT_ID,
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn phrases(items: &[&str]) -> ActionPattern {
    ActionPattern {
        phrases: strings(items),
        ..Default::default()
    }
}

fn ban(id: &str, pattern: ActionPattern, reason: &str) -> HardBan {
    HardBan {
        id: id.to_string(),
        pattern,
        reason: reason.to_string(),
        room_types: Vec::new(),
    }
}

fn trigger(id: &str, phrases: &[&str], reason: &str) -> EscalationTrigger {
    EscalationTrigger {
        id: id.to_string(),
        pattern: self::phrases(phrases),
        reason: reason.to_string(),
    }
}

/// Escalation triggers every built-in bot carries.
fn shared_triggers() -> Vec<EscalationTrigger> {
    vec![
        trigger(
            "legal-or-compliance",
            &["legal", "lawsuit", "compliance", "gdpr", "contract terms"],
            "Legal or compliance questions need a human decision",
        ),
        trigger(
            "personal-data",
            &["personal data", "home address", "social security", "medical record"],
            "Handling personal data needs human review",
        ),
    ]
}

/// Built-in role card for a bot id, if the bot is part of the default roster.
pub fn builtin_card(bot_id: &str) -> Option<RoleCard> {
    let card = match bot_id {
        LEAD_BOT_ID => RoleCard {
            bot_id: LEAD_BOT_ID.into(),
            display_name: "Lead".into(),
            domain: "Routes requests to specialists and owns the overall plan".into(),
            inputs: strings(&["human requests", "specialist results"]),
            outputs: strings(&["plans", "delegations", "status summaries"]),
            definition_of_done: strings(&[
                "every request has an owner",
                "the human got a consolidated answer",
            ]),
            hard_bans: vec![ban(
                "lead-no-deploy",
                phrases(&["deploy to production", "ship to production", "push to production"]),
                "The lead plans releases but never deploys",
            )],
            escalation_triggers: [
                shared_triggers(),
                vec![trigger(
                    "priority-conflict",
                    &["conflicting priorities", "deadline conflict"],
                    "Conflicting priorities need a human call",
                )],
            ]
            .concat(),
            metrics: strings(&["requests routed", "time to first answer"]),
        },
        RESEARCHER_BOT_ID => RoleCard {
            bot_id: RESEARCHER_BOT_ID.into(),
            display_name: "Researcher".into(),
            domain: "Finds, reads and summarizes sources".into(),
            inputs: strings(&["questions", "links"]),
            outputs: strings(&["summaries with citations"]),
            definition_of_done: strings(&["every claim has a source"]),
            hard_bans: vec![
                ban(
                    "researcher-no-outreach",
                    ActionPattern::category(ActionCategory::ExternalCommunication),
                    "No contacting people outside the workspace",
                ),
                ban(
                    "researcher-no-credentials",
                    ActionPattern::category(ActionCategory::CredentialAccess),
                    "No reading or sharing credentials",
                ),
            ],
            escalation_triggers: shared_triggers(),
            metrics: strings(&["sources cited", "turnaround"]),
        },
        CODER_BOT_ID => RoleCard {
            bot_id: CODER_BOT_ID.into(),
            display_name: "Coder".into(),
            domain: "Writes and reviews code on feature branches".into(),
            inputs: strings(&["specs", "bug reports"]),
            outputs: strings(&["patches", "review notes"]),
            definition_of_done: strings(&["tests pass", "change is reviewed"]),
            hard_bans: vec![
                ban(
                    "coder-no-prod-deploy",
                    ActionPattern::category(ActionCategory::Deployment)
                        .unless("release notes")
                        .unless("changelog"),
                    "No deploying to production",
                ),
                ban(
                    "coder-no-destructive",
                    phrases(&["rm -rf", "force push", "force-push", "drop table", "drop database"]),
                    "No destructive operations (deletes, force pushes)",
                ),
                ban(
                    "coder-no-credentials",
                    ActionPattern::category(ActionCategory::CredentialAccess),
                    "No reading or printing secrets",
                ),
            ],
            escalation_triggers: [
                shared_triggers(),
                vec![trigger(
                    "security-incident",
                    &["vulnerability", "security incident", "data breach"],
                    "Security issues go to a human first",
                )],
            ]
            .concat(),
            metrics: strings(&["patches merged", "review round trips"]),
        },
        WRITER_BOT_ID => RoleCard {
            bot_id: WRITER_BOT_ID.into(),
            display_name: "Writer".into(),
            domain: "Drafts long-form copy and documentation".into(),
            inputs: strings(&["outlines", "research summaries"]),
            outputs: strings(&["drafts"]),
            definition_of_done: strings(&["draft matches the brief", "tone reviewed"]),
            hard_bans: vec![ban(
                "writer-no-publish",
                ActionPattern::category(ActionCategory::ExternalPublish).unless("draft"),
                "No publishing (drafts only)",
            )],
            escalation_triggers: shared_triggers(),
            metrics: strings(&["drafts delivered", "revision count"]),
        },
        SOCIAL_BOT_ID => RoleCard {
            bot_id: SOCIAL_BOT_ID.into(),
            display_name: "Social".into(),
            domain: "Drafts social media posts and tracks engagement".into(),
            inputs: strings(&["campaign briefs", "engagement data"]),
            outputs: strings(&["post drafts", "engagement reports"]),
            definition_of_done: strings(&["draft approved by a human"]),
            hard_bans: vec![
                ban(
                    "no-direct-posting",
                    ActionPattern::category(ActionCategory::ExternalPublish).unless("draft"),
                    "No direct posting (drafts only)",
                ),
                ban(
                    "no-direct-messages",
                    ActionPattern::category(ActionCategory::ExternalCommunication),
                    "No messaging followers directly",
                ),
                ban(
                    "no-ad-spend",
                    ActionPattern::category(ActionCategory::Financial),
                    "No ad spend without approval",
                ),
            ],
            escalation_triggers: [
                shared_triggers(),
                vec![trigger(
                    "brand-crisis",
                    &["backlash", "pr crisis", "boycott"],
                    "Brand crises need a human response",
                )],
            ]
            .concat(),
            metrics: strings(&["drafts per week", "engagement rate"]),
        },
        ANALYST_BOT_ID => RoleCard {
            bot_id: ANALYST_BOT_ID.into(),
            display_name: "Analyst".into(),
            domain: "Analyzes metrics and builds reports".into(),
            inputs: strings(&["datasets", "questions"]),
            outputs: strings(&["reports", "charts"]),
            definition_of_done: strings(&["numbers reproducible from the source data"]),
            hard_bans: vec![
                ban(
                    "analyst-no-destructive",
                    ActionPattern::category(ActionCategory::Destructive),
                    "No modifying or deleting source data",
                ),
                ban(
                    "analyst-no-credentials",
                    ActionPattern::category(ActionCategory::CredentialAccess),
                    "No reading credentials",
                ),
            ],
            escalation_triggers: shared_triggers(),
            metrics: strings(&["reports delivered"]),
        },
        _ => return None,
    };
    Some(card)
}

/// Profiles of the built-in roster.
pub fn builtin_profiles() -> Vec<BotProfile> {
    BUILTIN_BOT_IDS
        .iter()
        .filter_map(|id| builtin_card(id))
        .map(|card| BotProfile {
            coordinator: card.bot_id == LEAD_BOT_ID,
            description: card.domain,
            display_name: card.display_name,
            id: card.bot_id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::matcher::validate_pattern;

    #[test]
    fn every_builtin_bot_has_a_card() {
        for id in BUILTIN_BOT_IDS {
            let card = builtin_card(id).unwrap();
            assert_eq!(card.bot_id, id);
            assert!(!card.domain.is_empty());
        }
        assert!(builtin_card("ghost").is_none());
    }

    #[test]
    fn builtin_patterns_are_valid_and_ids_unique() {
        for id in BUILTIN_BOT_IDS {
            let card = builtin_card(id).unwrap();
            let mut seen = std::collections::HashSet::new();
            for ban in &card.hard_bans {
                validate_pattern(&ban.pattern).unwrap();
                assert!(seen.insert(ban.id.clone()), "duplicate ban id {}", ban.id);
            }
            for trigger in &card.escalation_triggers {
                validate_pattern(&trigger.pattern).unwrap();
                assert!(seen.insert(trigger.id.clone()), "duplicate trigger id {}", trigger.id);
            }
        }
    }

    #[test]
    fn only_lead_is_coordinator() {
        let profiles = builtin_profiles();
        assert_eq!(profiles.len(), BUILTIN_BOT_IDS.len());
        let coordinators: Vec<_> = profiles.iter().filter(|p| p.coordinator).collect();
        assert_eq!(coordinators.len(), 1);
        assert_eq!(coordinators[0].id, LEAD_BOT_ID);
    }
}
