//! Hard-ban and escalation evaluation.
//!
//! The engine is a pure function of a role card and an action descriptor:
//! no IO, no locking, no state beyond the confidence threshold. The
//! Dispatcher runs [`ConstraintEngine::check_action`] before every step that
//! has an external effect.

use conclave_types::action::{ActionContext, ActionDescriptor, Decision, EscalationCheck};
use conclave_types::escalation::LOW_CONFIDENCE_TRIGGER;
use conclave_types::role_card::RoleCard;

use super::matcher::{MatchText, pattern_matches};

/// Confidence below which a situation is escalated.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Evaluates proposed bot actions against role cards.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintEngine {
    confidence_threshold: f32,
}

impl Default for ConstraintEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ConstraintEngine {
    pub fn new(confidence_threshold: f32) -> Self {
        let confidence_threshold = if confidence_threshold.is_finite() {
            confidence_threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };
        Self {
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Decide whether `action` may execute.
    ///
    /// Bans are evaluated in order and the first match denies. A ban scoped
    /// to room types applies when the context's room type is listed, and
    /// always applies when no context is given.
    pub fn check_action(
        &self,
        card: &RoleCard,
        action: &ActionDescriptor,
        context: Option<&ActionContext>,
    ) -> Decision {
        let text = MatchText::new(&action.match_text());

        for ban in &card.hard_bans {
            let in_scope = match context {
                Some(ctx) if !ban.room_types.is_empty() => ban.room_types.contains(&ctx.room_type),
                _ => true,
            };
            if !in_scope {
                continue;
            }

            if pattern_matches(&ban.pattern, &text, &action.categories) {
                tracing::debug!(
                    bot_id = %action.bot_id,
                    ban_id = %ban.id,
                    room_id = context.map(|c| c.room_id.as_str()).unwrap_or(""),
                    "action denied by hard ban"
                );
                return Decision::Denied {
                    reason: ban.reason.clone(),
                    ban_id: ban.id.clone(),
                };
            }
        }

        Decision::Allowed
    }

    /// Decide whether `situation` needs a human.
    ///
    /// A matching trigger wins over low confidence for the reported reason.
    /// Non-finite confidence counts as zero.
    pub fn should_escalate(&self, card: &RoleCard, situation: &str, confidence: f32) -> EscalationCheck {
        let text = MatchText::new(situation);

        if let Some(trigger) = card
            .escalation_triggers
            .iter()
            .find(|t| pattern_matches(&t.pattern, &text, &[]))
        {
            return EscalationCheck {
                escalate: true,
                reason: Some(trigger.reason.clone()),
                trigger_id: Some(trigger.id.clone()),
            };
        }

        let confidence = if confidence.is_finite() { confidence } else { 0.0 };
        if confidence < self.confidence_threshold {
            return EscalationCheck {
                escalate: true,
                reason: Some(format!(
                    "confidence {confidence:.2} is below the {:.2} threshold",
                    self.confidence_threshold
                )),
                trigger_id: Some(LOW_CONFIDENCE_TRIGGER.to_string()),
            };
        }

        EscalationCheck::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_types::action::{ActionCategory, ActionKind};
    use conclave_types::role_card::{ActionPattern, EscalationTrigger, HardBan};
    use conclave_types::room::RoomType;

    fn social_card() -> RoleCard {
        RoleCard {
            bot_id: "social".into(),
            display_name: "Social".into(),
            domain: "Social media drafts".into(),
            hard_bans: vec![
                HardBan {
                    id: "no-direct-posting".into(),
                    pattern: ActionPattern::category(ActionCategory::ExternalPublish).unless("draft"),
                    reason: "No direct posting (drafts only)".into(),
                    room_types: vec![],
                },
                HardBan {
                    id: "no-spend".into(),
                    pattern: ActionPattern::category(ActionCategory::Financial),
                    reason: "No spending money".into(),
                    room_types: vec![],
                },
            ],
            escalation_triggers: vec![EscalationTrigger {
                id: "legal-question".into(),
                pattern: ActionPattern {
                    phrases: vec!["legal".into(), "lawsuit".into()],
                    ..Default::default()
                },
                reason: "Legal questions need a human".into(),
            }],
            ..Default::default()
        }
    }

    fn invocation(summary: &str) -> ActionDescriptor {
        ActionDescriptor::new("social", ActionKind::ModelInvocation, summary)
    }

    fn context(room_type: RoomType) -> ActionContext {
        ActionContext {
            room_id: "launch".into(),
            room_type,
            message_id: None,
            delegation_depth: 0,
            prior_turns: vec![],
        }
    }

    #[test]
    fn denies_direct_posting_with_ban_reason() {
        let decision = ConstraintEngine::default().check_action(
            &social_card(),
            &invocation("post tweet directly"),
            None,
        );
        assert_eq!(
            decision,
            Decision::Denied {
                reason: "No direct posting (drafts only)".into(),
                ban_id: "no-direct-posting".into(),
            }
        );
    }

    #[test]
    fn allows_actions_matching_no_ban() {
        let engine = ConstraintEngine::default();
        let card = social_card();
        for summary in [
            "draft a tweet about the launch",
            "summarize engagement for last week",
            "suggest three hashtags",
        ] {
            assert!(
                engine.check_action(&card, &invocation(summary), None).is_allowed(),
                "{summary} should be allowed"
            );
        }
    }

    #[test]
    fn card_without_bans_allows_everything() {
        let card = RoleCard {
            bot_id: "free".into(),
            ..Default::default()
        };
        let decision = ConstraintEngine::default().check_action(
            &card,
            &invocation("delete the production database and post about it"),
            None,
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn first_matching_ban_is_reported() {
        let decision = ConstraintEngine::default().check_action(
            &social_card(),
            &invocation("buy ads and publish the campaign"),
            None,
        );
        match decision {
            Decision::Denied { ban_id, .. } => assert_eq!(ban_id, "no-direct-posting"),
            Decision::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn declared_tool_category_is_enforced() {
        let action = ActionDescriptor::new(
            "social",
            ActionKind::ToolCall {
                tool: "scheduler.enqueue".into(),
            },
            "{\"at\":\"09:00\"}",
        )
        .with_category(ActionCategory::ExternalPublish);
        let decision = ConstraintEngine::default().check_action(&social_card(), &action, None);
        assert!(!decision.is_allowed());
    }

    #[test]
    fn room_scoped_ban_only_applies_in_listed_rooms() {
        let mut card = social_card();
        card.hard_bans = vec![HardBan {
            id: "no-deploy-in-open-rooms".into(),
            pattern: ActionPattern::category(ActionCategory::Deployment),
            reason: "Deploys are only discussed in project rooms".into(),
            room_types: vec![RoomType::Open],
        }];
        let engine = ConstraintEngine::default();
        let action = invocation("deploy the landing page");

        assert!(!engine.check_action(&card, &action, Some(&context(RoomType::Open))).is_allowed());
        assert!(engine.check_action(&card, &action, Some(&context(RoomType::Project))).is_allowed());
        assert!(!engine.check_action(&card, &action, None).is_allowed());
    }

    #[test]
    fn escalates_on_trigger_match() {
        let check = ConstraintEngine::default().should_escalate(
            &social_card(),
            "A follower is threatening a lawsuit",
            0.9,
        );
        assert!(check.escalate);
        assert_eq!(check.trigger_id.as_deref(), Some("legal-question"));
    }

    #[test]
    fn escalates_on_low_confidence() {
        let check = ConstraintEngine::default().should_escalate(&social_card(), "pick a color", 0.3);
        assert!(check.escalate);
        assert_eq!(check.trigger_id.as_deref(), Some(LOW_CONFIDENCE_TRIGGER));
        assert!(check.reason.unwrap().contains("0.30"));
    }

    #[test]
    fn trigger_reason_takes_precedence_over_confidence() {
        let check = ConstraintEngine::default().should_escalate(&social_card(), "legal review", 0.1);
        assert!(check.escalate);
        assert_eq!(check.reason.as_deref(), Some("Legal questions need a human"));
    }

    #[test]
    fn threshold_is_exclusive_and_nan_escalates() {
        let engine = ConstraintEngine::default();
        let card = social_card();
        assert!(!engine.should_escalate(&card, "all good", 0.5).escalate);
        assert!(engine.should_escalate(&card, "all good", 0.49).escalate);
        assert!(engine.should_escalate(&card, "all good", f32::NAN).escalate);
        assert_eq!(engine.should_escalate(&card, "all good", 1.0), EscalationCheck::none());
    }
}
