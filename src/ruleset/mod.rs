//! Versioned rule sets.
//!
//! A [`RuleSetDefinition`] is the TOML document operators edit. Compiling
//! it into a [`RuleSet`] validates everything up front (weights, thresholds,
//! predicate syntax, feature names) and either succeeds as a whole or
//! reports every problem at once. A compiled set is immutable; hot reload
//! swaps whole snapshots through [`ActiveRules`].

pub mod active;
pub mod watcher;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Action, PatternType, RiskLevel};
use crate::engine::normalize::is_dimension;
use crate::engine::predicate::{self, Expr};
use crate::error::EngineError;

pub use active::ActiveRules;

/// Rule set compiled into the binary, used when no rules file exists.
pub const BUILTIN_RULES: &str = include_str!("../../config/rules.toml");

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] EngineError),
}

// --- Scoring, thresholds, defaults ---

/// How the scorer treats a dimension it could not extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Drop the dimension and rescale the remaining weights.
    #[default]
    Renormalize,
    /// Count it as maximal risk.
    Pessimistic,
    /// Count it as no risk.
    Optimistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: BTreeMap<String, f64>,
    pub missing: MissingPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weights = [
            ("detection_score", 0.4),
            ("total_volume_usd", 0.25),
            ("counterparty_count", 0.2),
            ("roundtrip_count", 0.05),
            ("self_trade_ratio", 0.05),
            ("velocity", 0.05),
        ];
        Self {
            weights: weights.into_iter().map(|(k, w)| (k.to_string(), w)).collect(),
            missing: MissingPolicy::Renormalize,
        }
    }
}

/// Lower bounds of the MEDIUM, HIGH and CRITICAL tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTable {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.6,
            critical: 0.9,
        }
    }
}

impl ThresholdTable {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.critical {
            RiskLevel::Critical
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn boundaries(&self) -> [f64; 3] {
        [self.medium, self.high, self.critical]
    }

    /// Distance from `score` to the closest tier boundary.
    pub fn distance_to_boundary(&self, score: f64) -> f64 {
        self.boundaries()
            .iter()
            .map(|b| (score - b).abs())
            .fold(f64::INFINITY, f64::min)
    }

    fn validate(&self, reasons: &mut Vec<String>) {
        let [medium, high, critical] = self.boundaries();
        if [medium, high, critical].iter().any(|b| !b.is_finite()) {
            reasons.push("thresholds must be finite".to_string());
            return;
        }
        if !(0.0 < medium && medium < high && high < critical && critical < 1.0) {
            reasons.push(format!(
                "thresholds must be strictly increasing inside (0, 1), \
                 got medium={medium} high={high} critical={critical}"
            ));
        }
    }
}

/// Action taken per risk tier when no rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultActions {
    pub low: Action,
    pub medium: Action,
    pub high: Action,
    pub critical: Action,
}

impl Default for DefaultActions {
    fn default() -> Self {
        Self {
            low: Action::Observe,
            medium: Action::Warn,
            high: Action::Escalate,
            critical: Action::Freeze,
        }
    }
}

impl DefaultActions {
    pub fn for_level(&self, level: RiskLevel) -> Action {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Critical => self.critical,
        }
    }
}

/// Confidence blending parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Share of confidence taken from the decisive rule's weight.
    pub rule_weight_share: f64,
    /// Distance from the nearest boundary at which the score alone is
    /// fully confident.
    pub full_margin: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            rule_weight_share: 0.7,
            full_margin: 0.1,
        }
    }
}

// --- File format ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(alias = "id")]
    pub rule_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
    pub predicate: String,
    pub action: Action,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Patterns the rule applies to; empty means all.
    #[serde(default)]
    pub patterns: Vec<PatternType>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(rule_id: &str, predicate: &str, action: Action) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            description: String::new(),
            priority: 0,
            predicate: predicate.to_string(),
            action,
            weight: default_weight(),
            enabled: true,
            patterns: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_patterns(mut self, patterns: &[PatternType]) -> Self {
        self.patterns = patterns.to_vec();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDefinition {
    pub version: u64,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub thresholds: ThresholdTable,
    #[serde(default)]
    pub default_actions: DefaultActions,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSetDefinition {
    pub fn new(version: u64, rules: Vec<RuleDefinition>) -> Self {
        Self {
            version,
            rules,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn builtin() -> Result<Self, LoadError> {
        Self::from_toml_str(BUILTIN_RULES)
    }
}

// --- Compiled form ---

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub rule_id: String,
    pub description: String,
    pub priority: i64,
    /// Source text, kept so a decision can be audited against it.
    pub predicate_text: String,
    pub predicate: Expr,
    pub action: Action,
    pub weight: f64,
    pub enabled: bool,
    pub patterns: Vec<PatternType>,
}

impl Rule {
    pub fn applies_to(&self, pattern: PatternType) -> bool {
        self.patterns.is_empty() || self.patterns.contains(&pattern)
    }
}

/// Immutable, validated snapshot of a rule configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    version: u64,
    /// Sorted by `(priority, rule_id)`.
    rules: Vec<Rule>,
    pub scoring: ScoringConfig,
    pub thresholds: ThresholdTable,
    pub default_actions: DefaultActions,
    pub confidence: ConfidenceConfig,
}

impl RuleSet {
    /// Validate and compile a definition. Either every check passes or the
    /// error lists every reason it was rejected.
    pub fn compile(def: RuleSetDefinition) -> Result<Self, EngineError> {
        let mut reasons = Vec::new();

        if def.version == 0 {
            reasons.push("version must be at least 1".to_string());
        }
        validate_weights(&def.scoring, &mut reasons);
        def.thresholds.validate(&mut reasons);

        let share = def.confidence.rule_weight_share;
        if !(0.0..=1.0).contains(&share) {
            reasons.push(format!("confidence.rule_weight_share {share} outside [0, 1]"));
        }
        let margin = def.confidence.full_margin;
        if !(margin.is_finite() && margin > 0.0) {
            reasons.push(format!("confidence.full_margin {margin} must be positive"));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(def.rules.len());
        for rule in def.rules {
            if let Some(compiled) = compile_rule(rule, &mut seen, &mut reasons) {
                rules.push(compiled);
            }
        }

        if !reasons.is_empty() {
            return Err(EngineError::InvalidRuleSet {
                version: def.version,
                reasons,
            });
        }

        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        Ok(Self {
            version: def.version,
            rules,
            scoring: def.scoring,
            thresholds: def.thresholds,
            default_actions: def.default_actions,
            confidence: def.confidence,
        })
    }

    pub fn builtin() -> Result<Self, LoadError> {
        Ok(Self::compile(RuleSetDefinition::builtin()?)?)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// All rules, enabled or not, in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    /// Action dictated purely by the score's tier.
    pub fn default_action(&self, level: RiskLevel) -> Action {
        self.default_actions.for_level(level)
    }
}

fn validate_weights(scoring: &ScoringConfig, reasons: &mut Vec<String>) {
    if scoring.weights.is_empty() {
        reasons.push("scoring.weights is empty".to_string());
        return;
    }
    let mut sum = 0.0;
    for (name, weight) in &scoring.weights {
        if !is_dimension(name) {
            reasons.push(format!("scoring weight for unknown dimension {name:?}"));
        }
        if !weight.is_finite() || *weight < 0.0 {
            reasons.push(format!(
                "scoring weight for {name} must be a non-negative number, got {weight}"
            ));
            continue;
        }
        sum += weight;
    }
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        reasons.push(format!("scoring weights must sum to 1, got {sum}"));
    }
    if scoring.weights.get("detection_score").copied().unwrap_or(0.0) <= 0.0 {
        reasons.push("scoring weight for detection_score must be positive".to_string());
    }
}

fn compile_rule(
    def: RuleDefinition,
    seen: &mut HashSet<String>,
    reasons: &mut Vec<String>,
) -> Option<Rule> {
    let id = def.rule_id.trim();
    if id.is_empty() {
        reasons.push("rule with empty rule_id".to_string());
        return None;
    }
    if !seen.insert(id.to_string()) {
        reasons.push(format!("duplicate rule_id {id:?}"));
    }

    let mut ok = true;
    if !(0.0..=1.0).contains(&def.weight) {
        reasons.push(format!("rule {id}: weight {} outside [0, 1]", def.weight));
        ok = false;
    }

    let predicate = match predicate::parse(&def.predicate) {
        Ok(expr) => expr,
        Err(e) => {
            reasons.push(format!("rule {id}: predicate: {e}"));
            return None;
        }
    };
    for feature in predicate.feature_refs() {
        if !is_dimension(&feature.name) {
            reasons.push(format!("rule {id}: unknown feature {:?}", feature.name));
            ok = false;
        }
    }

    ok.then(|| Rule {
        rule_id: id.to_string(),
        description: def.description,
        priority: def.priority,
        predicate_text: def.predicate,
        predicate,
        action: def.action,
        weight: def.weight,
        enabled: def.enabled,
        patterns: def.patterns,
    })
}
