use crate::core::{Action, RiskLevel};
use crate::engine::rules::FiredRule;
use crate::ruleset::RuleSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: Action,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    /// Rule whose action was taken; `None` when the tier default applied.
    pub decisive_rule: Option<String>,
    /// What the score tier alone would have chosen.
    pub default_action: Action,
}

impl Resolution {
    pub fn overrides_default(&self) -> bool {
        self.action != self.default_action
    }
}

/// Pick exactly one action and risk level for the fired rules.
///
/// The most severe fired action wins (FREEZE > ESCALATE > WARN > OBSERVE);
/// among rules sharing it, the earliest in evaluation order is decisive.
/// Risk level always comes from the score, whatever the action.
pub fn resolve(fired: &[FiredRule], score: f64, rules: &RuleSet) -> Resolution {
    let risk_level = rules.thresholds.level_for(score);
    let default_action = rules.default_action(risk_level);
    let base = base_confidence(score, rules);

    let decisive = fired
        .iter()
        .reduce(|best, rule| if rule.action > best.action { rule } else { best });

    let (action, confidence, decisive_rule) = match decisive {
        Some(rule) => {
            let share = rules.confidence.rule_weight_share;
            let blended = share * rule.weight + (1.0 - share) * base;
            (rule.action, blended, Some(rule.rule_id.clone()))
        }
        None => (default_action, base, None),
    };

    Resolution {
        action,
        risk_level,
        confidence: confidence.clamp(0.0, 1.0),
        decisive_rule,
        default_action,
    }
}

/// Confidence from the score alone: 0.5 on a tier boundary, rising to 1.0
/// once the score is `full_margin` away from every boundary.
pub fn base_confidence(score: f64, rules: &RuleSet) -> f64 {
    let margin = rules.confidence.full_margin;
    let distance = rules.thresholds.distance_to_boundary(score);
    0.5 + 0.5 * (distance / margin).min(1.0)
}
