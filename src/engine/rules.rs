use crate::core::{Action, FeatureVector, PatternType};
use crate::engine::predicate::Truth;
use crate::ruleset::RuleSet;

/// A rule whose predicate held for this alert.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredRule {
    pub rule_id: String,
    pub action: Action,
    pub weight: f64,
    pub priority: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    /// Every fired rule, in evaluation order.
    pub fired: Vec<FiredRule>,
    /// Rules that could not be decided because a feature was missing.
    pub undecided: Vec<String>,
}

/// Evaluate every enabled rule that applies to `pattern`.
///
/// Rules run in `(priority, rule_id)` order and all matches are collected;
/// resolving conflicts between them is left to the resolver.
pub fn evaluate(
    features: &FeatureVector,
    score: f64,
    pattern: PatternType,
    rules: &RuleSet,
) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();
    for rule in rules.rules() {
        if !rule.enabled || !rule.applies_to(pattern) {
            continue;
        }
        match rule.predicate.evaluate(features, score) {
            Truth::True => outcome.fired.push(FiredRule {
                rule_id: rule.rule_id.clone(),
                action: rule.action,
                weight: rule.weight,
                priority: rule.priority,
            }),
            Truth::Undecided => outcome.undecided.push(rule.rule_id.clone()),
            Truth::False => {}
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeatureValue;
    use crate::ruleset::{RuleDefinition, RuleSetDefinition};

    fn features() -> FeatureVector {
        let mut fv = FeatureVector::new();
        fv.insert("detection_score", FeatureValue::Present { raw: 0.87, normalized: 0.87 });
        fv.insert("counterparty_count", FeatureValue::Present { raw: 2.0, normalized: 0.89 });
        fv.insert("velocity", FeatureValue::missing("velocity not reported"));
        fv
    }

    fn ruleset(rules: Vec<RuleDefinition>) -> RuleSet {
        RuleSet::compile(RuleSetDefinition::new(1, rules)).unwrap()
    }

    fn ids(outcome: &RuleOutcome) -> Vec<&str> {
        outcome.fired.iter().map(|f| f.rule_id.as_str()).collect()
    }

    #[test]
    fn collects_all_matches_in_priority_order() {
        let rules = ruleset(vec![
            RuleDefinition::new("warn", "detection_score > 0.5", Action::Warn).with_priority(5),
            RuleDefinition::new("freeze", "counterparty_count <= 3", Action::Freeze)
                .with_priority(1),
            RuleDefinition::new("miss", "counterparty_count > 3", Action::Escalate),
        ]);
        let outcome = evaluate(&features(), 0.8, PatternType::WashTrade, &rules);
        assert_eq!(ids(&outcome), vec!["freeze", "warn"]);
        assert_eq!(outcome.fired[0].action, Action::Freeze);
        assert!(outcome.undecided.is_empty());
    }

    #[test]
    fn equal_priority_breaks_ties_by_id() {
        let rules = ruleset(vec![
            RuleDefinition::new("zeta", "score > 0.1", Action::Warn),
            RuleDefinition::new("alpha", "score > 0.1", Action::Warn),
        ]);
        let outcome = evaluate(&features(), 0.8, PatternType::Other, &rules);
        assert_eq!(ids(&outcome), vec!["alpha", "zeta"]);
    }

    #[test]
    fn undecided_rules_do_not_fire() {
        let rules = ruleset(vec![
            RuleDefinition::new("fast", "velocity > 2", Action::Escalate),
            RuleDefinition::new("slow", "NOT velocity > 2", Action::Observe),
        ]);
        let outcome = evaluate(&features(), 0.8, PatternType::Other, &rules);
        assert!(outcome.fired.is_empty());
        assert_eq!(outcome.undecided, vec!["fast", "slow"]);
    }

    #[test]
    fn skips_disabled_and_other_patterns() {
        let rules = ruleset(vec![
            RuleDefinition::new("off", "score > 0.1", Action::Freeze).disabled(),
            RuleDefinition::new("sandwich", "score > 0.1", Action::Escalate)
                .with_patterns(&[PatternType::Sandwich]),
            RuleDefinition::new("any", "score > 0.1", Action::Warn),
        ]);
        let outcome = evaluate(&features(), 0.8, PatternType::WashTrade, &rules);
        assert_eq!(ids(&outcome), vec!["any"]);
        let outcome = evaluate(&features(), 0.8, PatternType::Sandwich, &rules);
        assert_eq!(ids(&outcome), vec!["any", "sandwich"]);
    }
}
