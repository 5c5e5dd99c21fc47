//! Field-by-field merge of priority-ordered role-card layers.

use conclave_types::role_card::{RoleCard, RoleCardLayer};

/// Merge layers given highest priority first.
///
/// Each field comes from the first layer that defines it; list fields are
/// taken wholesale from that layer and never unioned with lower layers.
/// Returns `None` when no layer is present at all.
pub fn merge_layers(bot_id: &str, layers: &[Option<&RoleCardLayer>]) -> Option<RoleCard> {
    let present: Vec<&RoleCardLayer> = layers.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }

    fn pick<T: Clone>(layers: &[&RoleCardLayer], field: impl Fn(&RoleCardLayer) -> &Option<T>) -> Option<T> {
        layers.iter().find_map(|l| field(l).clone())
    }

    Some(RoleCard {
        bot_id: bot_id.to_string(),
        display_name: pick(&present, |l| &l.display_name).unwrap_or_else(|| bot_id.to_string()),
        domain: pick(&present, |l| &l.domain).unwrap_or_default(),
        inputs: pick(&present, |l| &l.inputs).unwrap_or_default(),
        outputs: pick(&present, |l| &l.outputs).unwrap_or_default(),
        definition_of_done: pick(&present, |l| &l.definition_of_done).unwrap_or_default(),
        hard_bans: pick(&present, |l| &l.hard_bans).unwrap_or_default(),
        escalation_triggers: pick(&present, |l| &l.escalation_triggers).unwrap_or_default(),
        metrics: pick(&present, |l| &l.metrics).unwrap_or_default(),
    })
}
