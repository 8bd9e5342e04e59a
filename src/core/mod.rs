pub mod features;
pub mod pipeline;
pub mod record;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

pub use features::{FeatureValue, FeatureVector};
pub use record::DecisionRecord;

/// Suspicious trading pattern reported by the upstream detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    Roundtrip,
    #[serde(alias = "SANDWICH_ATTACK")]
    Sandwich,
    #[serde(alias = "WASH_TRADING")]
    WashTrade,
    VolumeInflation,
    BurstTrading,
    #[default]
    #[serde(other)]
    Other,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Roundtrip => "ROUNDTRIP",
            PatternType::Sandwich => "SANDWICH",
            PatternType::WashTrade => "WASH_TRADE",
            PatternType::VolumeInflation => "VOLUME_INFLATION",
            PatternType::BurstTrading => "BURST_TRADING",
            PatternType::Other => "OTHER",
        }
    }

    /// Lowercase, space separated label for rationale text.
    pub fn label(&self) -> String {
        self.as_str().to_lowercase().replace('_', " ")
    }
}

/// Operational action, declared in escalation severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Observe,
    Warn,
    Escalate,
    Freeze,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Observe => "OBSERVE",
            Action::Warn => "WARN",
            Action::Escalate => "ESCALATE",
            Action::Freeze => "FREEZE",
        }
    }

    /// Outcomes that page a human.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Action::Freeze | Action::Escalate)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OBSERVE" => Ok(Action::Observe),
            "WARN" => Ok(Action::Warn),
            "ESCALATE" => Ok(Action::Escalate),
            "FREEZE" => Ok(Action::Freeze),
            other => Err(format!("unknown action {other:?}")),
        }
    }
}

/// Score-derived severity tier, independent of the chosen action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level {other:?}")),
        }
    }
}

/// Per-alert evaluation stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Normalized,
    Scored,
    RulesEvaluated,
    Resolved,
    Recorded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::Normalized => "NORMALIZED",
            Stage::Scored => "SCORED",
            Stage::RulesEvaluated => "RULES_EVALUATED",
            Stage::Resolved => "RESOLVED",
            Stage::Recorded => "RECORDED",
        };
        f.write_str(name)
    }
}

/// An anomaly report from the upstream detector.
///
/// Field aliases accept the detector's wire names (`score`, `pattern_type`,
/// `features`, `evidence_samples`). Fields this crate does not know about
/// are kept in `extra` so the alert can be re-serialized for audit replay.
/// Optional metadata that fails to parse is kept in `extra` under its own
/// key rather than failing the whole alert; see [`Alert::malformed_metadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireAlert")]
pub struct Alert {
    pub alert_id: String,
    pub address: String,
    pub detection_score: f64,
    pub pattern: PatternType,
    pub samples: Vec<Value>,
    pub raw_features: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Optional metadata fields parsed leniently.
const METADATA_FIELDS: [&str; 5] = ["chain", "pool", "pair", "time_window_sec", "detected_at"];

/// Wire shape of an alert: metadata arrives untyped and is parsed in
/// `From<WireAlert> for Alert`.
#[derive(Deserialize)]
struct WireAlert {
    #[serde(default)]
    alert_id: String,
    #[serde(default)]
    address: String,
    #[serde(alias = "score")]
    detection_score: f64,
    #[serde(default, alias = "pattern_type")]
    pattern: PatternType,
    #[serde(default, alias = "evidence_samples")]
    samples: Vec<Value>,
    #[serde(default, alias = "features")]
    raw_features: BTreeMap<String, Value>,
    #[serde(default)]
    chain: Option<Value>,
    #[serde(default)]
    pool: Option<Value>,
    #[serde(default)]
    pair: Option<Value>,
    #[serde(default)]
    time_window_sec: Option<Value>,
    #[serde(default)]
    detected_at: Option<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<WireAlert> for Alert {
    fn from(wire: WireAlert) -> Self {
        let mut extra = wire.extra;
        let mut take = |key: &str, value: Option<Value>, parse: fn(&Value) -> bool| {
            let value = value.filter(|v| !v.is_null())?;
            if parse(&value) {
                Some(value)
            } else {
                extra.insert(key.to_string(), value);
                None
            }
        };
        let chain = take("chain", wire.chain, |v| v.is_string());
        let pool = take("pool", wire.pool, |v| v.is_string());
        let pair = take("pair", wire.pair, |v| v.is_string());
        let window = take("time_window_sec", wire.time_window_sec, |v| {
            window_secs(v).is_some()
        });
        let detected = take("detected_at", wire.detected_at, |v| timestamp(v).is_some());

        Self {
            alert_id: wire.alert_id,
            address: wire.address,
            detection_score: wire.detection_score,
            pattern: wire.pattern,
            samples: wire.samples,
            raw_features: wire.raw_features,
            chain: chain.and_then(|v| v.as_str().map(str::to_string)),
            pool: pool.and_then(|v| v.as_str().map(str::to_string)),
            pair: pair.and_then(|v| v.as_str().map(str::to_string)),
            time_window_sec: window.as_ref().and_then(window_secs),
            detected_at: detected.as_ref().and_then(timestamp),
            extra,
        }
    }
}

/// Whole, non-negative seconds; `300` and `300.0` are accepted, `300.5` is not.
fn window_secs(value: &Value) -> Option<u64> {
    let n = as_number(value)?;
    (n >= 0.0 && n.fract() == 0.0 && n < u64::MAX as f64).then_some(n as u64)
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

impl Alert {
    /// Minimal alert with no features or samples.
    pub fn new(
        alert_id: impl Into<String>,
        address: impl Into<String>,
        detection_score: f64,
        pattern: PatternType,
    ) -> Self {
        Self {
            alert_id: alert_id.into(),
            address: address.into(),
            detection_score,
            pattern,
            samples: Vec::new(),
            raw_features: BTreeMap::new(),
            chain: None,
            pool: None,
            pair: None,
            time_window_sec: None,
            detected_at: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.raw_features.insert(name.to_string(), value.into());
        self
    }

    pub fn with_sample(mut self, sample: Value) -> Self {
        self.samples.push(sample);
        self
    }

    /// Reject alerts the engine cannot attribute or trust.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.alert_id.trim().is_empty() {
            return Err(EngineError::invalid_alert(None, "missing alert_id"));
        }
        let id = Some(self.alert_id.as_str());
        if self.address.trim().is_empty() {
            return Err(EngineError::invalid_alert(id, "missing address"));
        }
        if !self.detection_score.is_finite() || !(0.0..=1.0).contains(&self.detection_score) {
            return Err(EngineError::invalid_alert(
                id,
                format!("detection_score {} outside [0, 1]", self.detection_score),
            ));
        }
        Ok(())
    }

    /// Metadata fields that were present but unparseable, with their raw value.
    pub fn malformed_metadata(&self) -> impl Iterator<Item = (&str, &Value)> {
        METADATA_FIELDS
            .iter()
            .filter_map(|key| self.extra.get(*key).map(|value| (*key, value)))
    }

    /// Numeric view of a raw feature. Numeric strings are accepted.
    pub fn raw_number(&self, key: &str) -> Option<f64> {
        self.raw_features.get(key).and_then(as_number)
    }
}

/// Interpret a JSON value as a finite number.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
