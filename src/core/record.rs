use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Action, Alert, FeatureValue, FeatureVector, RiskLevel};

/// Immutable, auditable output of one evaluation.
///
/// Every entry of `evidence_refs` resolves through [`DecisionRecord::resolve_ref`]
/// against the retained `alert_data` and `features`, so a record can be
/// audited without re-running the pipeline. Corrections are new records that
/// name the old one in `supersedes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub alert_id: String,
    pub address: String,
    pub risk_level: RiskLevel,
    pub action: Action,
    pub confidence: f64,
    pub risk_score: f64,
    pub rationale: String,
    pub evidence_refs: Vec<String>,
    pub recommendations: Vec<String>,
    pub limitations: Vec<String>,
    /// Ids of every fired rule, in evaluation order.
    pub fired_rules: Vec<String>,
    pub rule_version: u64,
    pub decided_at: DateTime<Utc>,
    pub alert_data: Alert,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl DecisionRecord {
    /// Resolve an evidence pointer to the value it names.
    ///
    /// Supported forms: `features.<dimension>` (raw value of a present
    /// feature), `samples[<index>]` and `alert.<field>`.
    pub fn resolve_ref(&self, reference: &str) -> Option<Value> {
        if let Some(name) = reference.strip_prefix("features.") {
            return match self.features.get(name)? {
                FeatureValue::Present { raw, .. } => Some(Value::from(*raw)),
                FeatureValue::Missing { .. } => None,
            };
        }
        if let Some(index) = reference
            .strip_prefix("samples[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let index: usize = index.parse().ok()?;
            return self.alert_data.samples.get(index).cloned();
        }
        if let Some(field) = reference.strip_prefix("alert.") {
            let alert = serde_json::to_value(&self.alert_data).ok()?;
            return alert.get(field).filter(|v| !v.is_null()).cloned();
        }
        None
    }

    /// Whether two records carry the same decision, ignoring identity,
    /// timestamp and supersession link.
    pub fn same_decision(&self, other: &DecisionRecord) -> bool {
        self.alert_id == other.alert_id
            && self.address == other.address
            && self.risk_level == other.risk_level
            && self.action == other.action
            && self.confidence.to_bits() == other.confidence.to_bits()
            && self.risk_score.to_bits() == other.risk_score.to_bits()
            && self.rationale == other.rationale
            && self.evidence_refs == other.evidence_refs
            && self.recommendations == other.recommendations
            && self.limitations == other.limitations
            && self.fired_rules == other.fired_rules
            && self.rule_version == other.rule_version
            && self.alert_data == other.alert_data
            && self.features == other.features
    }
}
