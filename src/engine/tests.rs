use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use super::*;
use crate::core::{Action, PatternType, RiskLevel};
use crate::ruleset::{RuleDefinition, RuleSetDefinition};

fn engine_with(def: RuleSetDefinition) -> DecisionEngine {
    let rules = RuleSet::compile(def).unwrap();
    DecisionEngine::new(Arc::new(ActiveRules::new(rules)), EngineSettings::default())
}

fn builtin_engine() -> DecisionEngine {
    engine_with(RuleSetDefinition::builtin().unwrap())
}

fn wash_trade_alert() -> Alert {
    let address = "0x742d35cc6634c0532925a3b844bc454e4438f44e";
    Alert::new("alert-001", address, 0.87, PatternType::WashTrade)
        .with_feature("counterparty_count", 2)
        .with_feature("total_volume_usd", 125000)
}

fn scored_alert(detection: f64, counterparties: u32, volume: f64) -> Alert {
    Alert::new("alert-p", "0xabc", detection, PatternType::Other)
        .with_feature("counterparty_count", counterparties)
        .with_feature("total_volume_usd", volume)
}

#[test]
fn wash_trade_example_freezes() {
    let engine = engine_with(RuleSetDefinition::new(
        1,
        vec![RuleDefinition::new(
            "wash-freeze",
            "counterparty_count ≤ 3 AND total_volume_usd > 100000",
            Action::Freeze,
        )
        .with_weight(0.9)],
    ));
    let record = engine.evaluate(&wash_trade_alert()).unwrap();

    assert_eq!(record.action, Action::Freeze);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert!(record.confidence >= 0.85, "confidence {}", record.confidence);
    assert!(record.evidence_refs.contains(&"features.counterparty_count".to_string()));
    assert!(record.evidence_refs.contains(&"features.total_volume_usd".to_string()));
    assert_eq!(record.fired_rules, vec!["wash-freeze"]);
    assert_eq!(record.rule_version, 1);
    assert!(record.limitations.iter().any(|l| l.starts_with("only 0 sample(s)")));
}

#[test]
fn wash_trade_example_with_builtin_rules() {
    let record = builtin_engine().evaluate(&wash_trade_alert()).unwrap();
    assert_eq!(record.action, Action::Freeze);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert!(record.confidence >= 0.85);
    assert_eq!(record.fired_rules, vec!["wash-trade-freeze"]);
    assert!(record.rationale.contains("per rule wash-trade-freeze"));
}

#[test]
fn weak_alert_observes() {
    let alert = Alert::new("alert-002", "0xdef", 0.1, PatternType::Other);
    let record = builtin_engine().evaluate(&alert).unwrap();
    assert_eq!(record.action, Action::Observe);
    assert_eq!(record.risk_level, RiskLevel::Low);
    assert!(record.fired_rules.is_empty());
    assert!((record.risk_score - 0.1).abs() < 1e-12);
}

#[test]
fn freeze_beats_warn() {
    let engine = engine_with(RuleSetDefinition::new(
        1,
        vec![
            RuleDefinition::new("warn-first", "detection_score > 0.5", Action::Warn)
                .with_priority(0),
            RuleDefinition::new("freeze-later", "total_volume_usd > 1000", Action::Freeze)
                .with_priority(9),
        ],
    ));
    let record = engine.evaluate(&wash_trade_alert()).unwrap();
    assert_eq!(record.action, Action::Freeze);
    assert_eq!(record.fired_rules, vec!["warn-first", "freeze-later"]);
}

#[test]
fn no_rule_uses_score_tier() {
    let engine = engine_with(RuleSetDefinition::new(1, vec![]));
    let cases = [
        (0.2, RiskLevel::Low, Action::Observe),
        (0.5, RiskLevel::Medium, Action::Warn),
        (0.7, RiskLevel::High, Action::Escalate),
        (0.95, RiskLevel::Critical, Action::Freeze),
    ];
    for (detection, level, action) in cases {
        // Only detection_score is present, so it is the whole score.
        let alert = Alert::new("a", "0xabc", detection, PatternType::Other);
        let record = engine.evaluate(&alert).unwrap();
        assert_eq!(record.risk_level, level, "detection {detection}");
        assert_eq!(record.action, action, "detection {detection}");
        assert!(record.rationale.contains("tier default"));
    }
}

#[test]
fn critical_volume_freezes_without_rules() {
    let alert =
        Alert::new("a", "0xabc", 0.95, PatternType::Other).with_feature("total_volume_usd", 5e6);
    let record = builtin_engine().evaluate(&alert).unwrap();
    assert_eq!(record.risk_level, RiskLevel::Critical);
    assert_eq!(record.action, Action::Freeze);
}

#[test]
fn repeated_evaluation_is_identical() {
    let engine = builtin_engine();
    let alert = wash_trade_alert().with_sample(json!({"tx_hash": "0x1", "counterparty": "0xaaa"}));
    let first = engine.evaluate(&alert).unwrap();
    let second = engine.evaluate(&alert).unwrap();
    assert!(first.same_decision(&second));
    assert_ne!(first.decision_id, second.decision_id);
    assert!(second.decided_at >= first.decided_at);
}

#[test]
fn invalid_alert_is_rejected_before_normalizing() {
    let alert = Alert::new("a-9", "", 0.5, PatternType::Other);
    let err = builtin_engine().evaluate(&alert).unwrap_err();
    assert!(matches!(err, EngineError::InvalidAlert { .. }));
    assert_eq!(err.alert_id(), Some("a-9"));
    assert_eq!(err.stage(), Some(Stage::Received));
}

#[test]
fn exhausted_budget_times_out() {
    let rules = RuleSet::builtin().unwrap();
    let settings = EngineSettings {
        budget: Some(Duration::ZERO),
        ..EngineSettings::default()
    };
    let engine = DecisionEngine::new(Arc::new(ActiveRules::new(rules)), settings);
    let err = engine.evaluate(&wash_trade_alert()).unwrap_err();
    assert_eq!(
        err,
        EngineError::EvaluationTimeout {
            alert_id: "alert-001".into(),
            stage: Stage::Normalized,
            budget: Duration::ZERO,
        }
    );
}

#[test]
fn generous_budget_completes() {
    let rules = RuleSet::builtin().unwrap();
    let settings = EngineSettings {
        budget: Some(Duration::from_secs(30)),
        ..EngineSettings::default()
    };
    let engine = DecisionEngine::new(Arc::new(ActiveRules::new(rules)), settings);
    assert!(engine.evaluate(&wash_trade_alert()).is_ok());
}

fn version_two() -> RuleSetDefinition {
    RuleSetDefinition::new(
        2,
        vec![RuleDefinition::new("v2-escalate", "score > 0", Action::Escalate)],
    )
}

#[test]
fn pinned_version_survives_reload() {
    let engine = builtin_engine();
    let pinned = engine.rules().snapshot();
    assert_eq!(engine.reload(version_two()).unwrap(), 2);

    let old = engine.evaluate_against(&wash_trade_alert(), &pinned).unwrap();
    assert_eq!(old.rule_version, 1);
    assert_eq!(old.action, Action::Freeze);

    let new = engine.evaluate(&wash_trade_alert()).unwrap();
    assert_eq!(new.rule_version, 2);
    assert_eq!(new.action, Action::Escalate);
}

#[test]
fn concurrent_reload_never_tears() {
    let engine = Arc::new(builtin_engine());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..200)
                    .map(|_| engine.evaluate(&wash_trade_alert()).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    engine.reload(version_two()).unwrap();

    for worker in workers {
        for record in worker.join().unwrap() {
            match record.rule_version {
                1 => assert_eq!(record.fired_rules, vec!["wash-trade-freeze"]),
                2 => assert_eq!(record.fired_rules, vec!["v2-escalate"]),
                other => panic!("unexpected version {other}"),
            }
        }
    }
}

#[test]
fn rejected_reload_keeps_serving() {
    let engine = builtin_engine();
    let bad = RuleSetDefinition::new(
        2,
        vec![RuleDefinition::new("broken", "score >", Action::Freeze)],
    );
    assert!(matches!(engine.reload(bad), Err(EngineError::InvalidRuleSet { version: 2, .. })));
    let record = engine.evaluate(&wash_trade_alert()).unwrap();
    assert_eq!(record.rule_version, 1);
}

#[test]
fn supersede_links_previous_record() {
    let engine = builtin_engine();
    let original = engine.evaluate(&wash_trade_alert()).unwrap();
    engine.reload(version_two()).unwrap();

    let correction = engine.supersede(&original).unwrap();
    assert_eq!(correction.supersedes.as_deref(), Some(original.decision_id.as_str()));
    assert_eq!(correction.alert_data, original.alert_data);
    assert_eq!(correction.rule_version, 2);
    assert_eq!(original.supersedes, None);
}

#[test]
fn missing_features_become_limitations() {
    let alert =
        Alert::new("a", "0xabc", 0.7, PatternType::Sandwich).with_feature("velocity", "fast");
    let record = builtin_engine().evaluate(&alert).unwrap();
    assert!(record
        .limitations
        .contains(&"velocity unavailable: velocity is not numeric".to_string()));
    assert!(record.features.get("velocity").unwrap().is_missing());
}

#[test]
fn unknown_alert_fields_are_retained() {
    let alert: Alert = serde_json::from_value(json!({
        "alert_id": "a-7",
        "address": "0xabc",
        "score": 0.66,
        "pattern_type": "SANDWICH_ATTACK",
        "detector_version": "2.3.1"
    }))
    .unwrap();
    let record = builtin_engine().evaluate(&alert).unwrap();
    assert_eq!(record.resolve_ref("alert.detector_version"), Some(json!("2.3.1")));
}

fn arb_pattern() -> impl Strategy<Value = PatternType> {
    prop_oneof![
        Just(PatternType::Roundtrip),
        Just(PatternType::Sandwich),
        Just(PatternType::WashTrade),
        Just(PatternType::VolumeInflation),
        Just(PatternType::BurstTrading),
        Just(PatternType::Other),
    ]
}

fn arb_alert() -> impl Strategy<Value = Alert> {
    (
        0.0f64..=1.0,
        arb_pattern(),
        proptest::option::of(0u32..30),
        proptest::option::of(0.0f64..1e8),
        proptest::option::of(0u32..40),
        proptest::option::of(0.0f64..=1.0),
        proptest::collection::vec((0.0f64..1e6, 0u8..5), 0..8),
    )
        .prop_map(|(detection, pattern, cp, volume, roundtrips, self_trade, samples)| {
            let mut alert = Alert::new("alert-p", "0xabc", detection, pattern);
            if let Some(cp) = cp {
                alert = alert.with_feature("counterparty_count", cp);
            }
            if let Some(v) = volume {
                alert = alert.with_feature("total_volume_usd", v);
            }
            if let Some(r) = roundtrips {
                alert = alert.with_feature("roundtrip_count", r);
            }
            if let Some(s) = self_trade {
                alert = alert.with_feature("self_trade_ratio", s);
            }
            for (i, (amount, cp)) in samples.into_iter().enumerate() {
                alert = alert.with_sample(json!({
                    "tx_hash": format!("0x{i:02x}"),
                    "amount_usd": amount,
                    "counterparty": format!("0xc{cp}"),
                }));
            }
            alert
        })
}

proptest! {
    #[test]
    fn volume_never_lowers_risk(
        detection in 0.0f64..=1.0,
        counterparties in 1u32..20,
        volume in 0.0f64..1e9,
        extra in 0.0f64..1e9,
    ) {
        let engine = builtin_engine();
        let low = scored_alert(detection, counterparties, volume);
        let high = scored_alert(detection, counterparties, volume + extra);
        let low = engine.evaluate(&low).unwrap();
        let high = engine.evaluate(&high).unwrap();
        prop_assert!(high.risk_score >= low.risk_score);
        prop_assert!(high.risk_level >= low.risk_level);
    }

    #[test]
    fn detection_score_never_lowers_risk(
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
        volume in 0.0f64..1e8,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let engine = builtin_engine();
        let low = engine.evaluate(&scored_alert(lo, 4, volume)).unwrap();
        let high = engine.evaluate(&scored_alert(hi, 4, volume)).unwrap();
        prop_assert!(high.risk_score >= low.risk_score);
        prop_assert!(high.risk_level >= low.risk_level);
    }

    #[test]
    fn more_counterparties_never_raise_risk(
        a in 0u32..30,
        b in 0u32..30,
        detection in 0.0f64..=1.0,
    ) {
        let (few, many) = if a <= b { (a, b) } else { (b, a) };
        let engine = builtin_engine();
        let concentrated = engine.evaluate(&scored_alert(detection, few, 250_000.0)).unwrap();
        let diverse = engine.evaluate(&scored_alert(detection, many, 250_000.0)).unwrap();
        prop_assert!(concentrated.risk_score >= diverse.risk_score);
    }

    #[test]
    fn evaluation_is_deterministic(alert in arb_alert()) {
        let engine = builtin_engine();
        let first = engine.evaluate(&alert).unwrap();
        let second = engine.evaluate(&alert).unwrap();
        prop_assert!(first.same_decision(&second));
    }

    #[test]
    fn every_evidence_ref_resolves(alert in arb_alert()) {
        let record = builtin_engine().evaluate(&alert).unwrap();
        prop_assert!((0.0..=1.0).contains(&record.confidence));
        prop_assert!((0.0..=1.0).contains(&record.risk_score));
        for r in &record.evidence_refs {
            prop_assert!(record.resolve_ref(r).is_some(), "{} does not resolve", r);
        }
    }

    #[test]
    fn rule_free_decisions_follow_score_tier(alert in arb_alert()) {
        let engine = engine_with(RuleSetDefinition::new(1, vec![]));
        let record = engine.evaluate(&alert).unwrap();
        let rules = engine.rules().snapshot();
        prop_assert_eq!(record.risk_level, rules.thresholds.level_for(record.risk_score));
        prop_assert_eq!(record.action, rules.default_action(record.risk_level));
    }
}
