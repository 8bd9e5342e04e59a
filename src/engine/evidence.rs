//! Evidence compilation: turns the intermediate results of one evaluation
//! into the immutable [`DecisionRecord`].
//!
//! Everything here is a pure function of its arguments; the caller supplies
//! `decided_at` and the only other input is a fresh decision id.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::{Action, Alert, DecisionRecord, FeatureVector};
use crate::engine::resolve::Resolution;
use crate::engine::rules::RuleOutcome;
use crate::engine::score::ScoreBreakdown;
use crate::ruleset::RuleSet;

/// Number of contributing dimensions named in the rationale.
const TOP_CONTRIBUTORS: usize = 3;

/// Time windows shorter than this are flagged as a limitation.
const SHORT_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceSettings {
    /// Fewer samples than this is recorded as a limitation.
    pub min_samples: usize,
    /// Cap on `samples[i]` references per record.
    pub max_evidence_samples: usize,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_evidence_samples: 5,
        }
    }
}

/// Intermediate results of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Findings<'a> {
    pub features: &'a FeatureVector,
    pub breakdown: &'a ScoreBreakdown,
    pub outcome: &'a RuleOutcome,
    pub resolution: &'a Resolution,
}

pub fn compile(
    alert: &Alert,
    findings: &Findings<'_>,
    rules: &RuleSet,
    settings: &EvidenceSettings,
    decided_at: DateTime<Utc>,
) -> DecisionRecord {
    let resolution = findings.resolution;
    DecisionRecord {
        decision_id: Uuid::new_v4().to_string(),
        alert_id: alert.alert_id.clone(),
        address: alert.address.clone(),
        risk_level: resolution.risk_level,
        action: resolution.action,
        confidence: resolution.confidence,
        risk_score: findings.breakdown.score,
        rationale: rationale(alert, findings),
        evidence_refs: evidence_refs(alert, findings, rules, settings),
        recommendations: recommendations(findings),
        limitations: limitations(alert, findings, settings),
        fired_rules: findings
            .outcome
            .fired
            .iter()
            .map(|f| f.rule_id.clone())
            .collect(),
        rule_version: rules.version(),
        decided_at,
        alert_data: alert.clone(),
        features: findings.features.clone(),
        supersedes: None,
    }
}

fn rationale(alert: &Alert, findings: &Findings<'_>) -> String {
    let resolution = findings.resolution;
    let mut text = format!(
        "{} risk {} alert on {}: {}",
        resolution.risk_level,
        alert.pattern.label(),
        alert.address,
        resolution.action,
    );

    match &resolution.decisive_rule {
        Some(id) => {
            let weight = findings
                .outcome
                .fired
                .iter()
                .find(|f| &f.rule_id == id)
                .map(|f| f.weight)
                .unwrap_or_default();
            text.push_str(&format!(" per rule {id} (weight {weight:.2})."));
        }
        None => text.push_str(&format!(" per {} tier default.", resolution.risk_level)),
    }

    let others: Vec<&str> = findings
        .outcome
        .fired
        .iter()
        .map(|f| f.rule_id.as_str())
        .filter(|id| Some(*id) != resolution.decisive_rule.as_deref())
        .collect();
    if !others.is_empty() {
        text.push_str(&format!(" Also fired: {}.", others.join(", ")));
    }

    text.push_str(&format!(
        " Risk score {:.3} (detection score {:.3}).",
        findings.breakdown.score, alert.detection_score
    ));

    let top: Vec<String> = findings
        .breakdown
        .top(TOP_CONTRIBUTORS)
        .iter()
        .map(|c| format!("{} {:.3}", c.dimension, c.contribution))
        .collect();
    if top.is_empty() {
        text.push_str(" No scoring dimension available.");
    } else {
        text.push_str(&format!(" Top factors: {}.", top.join(", ")));
    }

    if resolution.overrides_default() {
        text.push_str(&format!(
            " Action differs from the {} tier default {}.",
            resolution.risk_level, resolution.default_action
        ));
    }
    text
}

fn evidence_refs(
    alert: &Alert,
    findings: &Findings<'_>,
    rules: &RuleSet,
    settings: &EvidenceSettings,
) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |r: String| {
        if !refs.contains(&r) {
            refs.push(r);
        }
    };

    // Decisive rule first, then the rest in evaluation order.
    let decisive = findings.resolution.decisive_rule.as_deref();
    let fired = findings.outcome.fired.iter();
    let ordered = fired
        .clone()
        .filter(|f| Some(f.rule_id.as_str()) == decisive)
        .chain(fired.filter(|f| Some(f.rule_id.as_str()) != decisive));

    for fired in ordered {
        let Some(rule) = rules.rule(&fired.rule_id) else {
            continue;
        };
        for feature in rule.predicate.feature_refs() {
            if findings.features.raw(&feature.name).is_some() {
                push(format!("features.{}", feature.name));
            }
        }
    }

    for c in findings.breakdown.top(TOP_CONTRIBUTORS) {
        if !c.imputed && findings.features.raw(&c.dimension).is_some() {
            push(format!("features.{}", c.dimension));
        }
    }

    for i in 0..alert.samples.len().min(settings.max_evidence_samples) {
        push(format!("samples[{i}]"));
    }
    refs
}

fn playbook(action: Action) -> &'static [&'static str] {
    match action {
        Action::Freeze => &[
            "Freeze account pending manual review",
            "Investigate counterparty addresses",
            "Review transaction history for past 30 days",
        ],
        Action::Escalate => &[
            "Escalate to compliance team",
            "Prepare evidence package for review",
            "Consider regulatory reporting requirements",
        ],
        Action::Warn => &[
            "Flag account for enhanced monitoring",
            "Set up alerts for future activity",
            "Review if pattern persists over 7 days",
        ],
        Action::Observe => &["Continue monitoring", "No immediate action required"],
    }
}

fn recommendations(findings: &Findings<'_>) -> Vec<String> {
    let resolution = findings.resolution;
    let mut out: Vec<String> = playbook(resolution.action)
        .iter()
        .map(|s| s.to_string())
        .collect();

    if resolution.default_action > resolution.action {
        out.push(format!(
            "Manual review advised: {} risk tier defaults to {}",
            resolution.risk_level, resolution.default_action
        ));
    }

    let missing: Vec<&str> = findings.features.missing().map(|(name, _)| name).collect();
    if !missing.is_empty() {
        out.push(format!(
            "Collect missing signals before closing: {}",
            missing.join(", ")
        ));
    }
    out
}

fn limitations(
    alert: &Alert,
    findings: &Findings<'_>,
    settings: &EvidenceSettings,
) -> Vec<String> {
    let mut out = Vec::new();

    for (name, reason) in findings.features.missing() {
        out.push(format!("{name} unavailable: {reason}"));
    }
    for id in &findings.outcome.undecided {
        out.push(format!("rule {id} undecided: it references a missing feature"));
    }

    let samples = alert.samples.len();
    if samples < settings.min_samples {
        out.push(format!(
            "only {samples} sample(s) available (minimum {})",
            settings.min_samples
        ));
    }

    if let Some(window) = alert.time_window_sec.filter(|w| *w < SHORT_WINDOW_SECS) {
        out.push(format!("analysis limited to a {window}s time window"));
    }
    if alert.pool.is_some() {
        out.push(SINGLE_POOL.to_string());
    }
    for (key, value) in alert.malformed_metadata() {
        out.push(format!("{key} ignored: unparseable value {value}"));
    }
    out
}

const SINGLE_POOL: &str =
    "analysis limited to a single pool; cross-pool and cross-chain activity not checked";
