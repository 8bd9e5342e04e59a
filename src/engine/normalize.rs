use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::{Alert, FeatureValue, FeatureVector, as_number};
use crate::error::EngineError;

/// Volume at which the volume dimension saturates (USD).
const VOLUME_CAP_USD: f64 = 10_000_000.0;

/// Counterparty count at or above which diversity carries no risk.
const COUNTERPARTY_CAP: f64 = 10.0;

/// Extracts one risk dimension from an alert.
///
/// Extraction never fails: anything unusable becomes
/// [`FeatureValue::Missing`] with a reason that ends up in the record's
/// limitations.
pub trait Extractor {
    fn name(&self) -> &'static str;
    fn extract(&self, alert: &Alert) -> FeatureValue;
}

/// The fixed dimension catalog, in name order.
pub fn default_extractors() -> Vec<Box<dyn Extractor + Send + Sync>> {
    vec![
        Box::new(CounterpartyCount),
        Box::new(DetectionScore),
        Box::new(RoundtripCount),
        Box::new(SelfTradeRatio),
        Box::new(TotalVolume),
        Box::new(Velocity),
    ]
}

/// Names of every dimension a rule set may reference.
pub fn dimension_names() -> Vec<&'static str> {
    default_extractors().iter().map(|e| e.name()).collect()
}

pub fn is_dimension(name: &str) -> bool {
    dimension_names().contains(&name)
}

/// Build the feature vector for a structurally valid alert.
pub fn normalize(alert: &Alert) -> Result<FeatureVector, EngineError> {
    alert.validate()?;
    let mut features = FeatureVector::new();
    for extractor in default_extractors() {
        features.insert(extractor.name(), extractor.extract(alert));
    }
    Ok(features)
}

/// Read a non-negative numeric raw feature, falling back through aliases.
fn non_negative(alert: &Alert, keys: &[&str]) -> Result<Option<f64>, String> {
    for key in keys {
        let Some(value) = alert.raw_features.get(*key) else {
            continue;
        };
        return match as_number(value) {
            Some(n) if n >= 0.0 => Ok(Some(n)),
            Some(n) => Err(format!("{key} is negative ({n})")),
            None => Err(format!("{key} is not numeric")),
        };
    }
    Ok(None)
}

/// `1 - 1/(1 + x/midpoint)`: 0 at 0, 0.5 at the midpoint, approaches 1.
fn saturating(x: f64, midpoint: f64) -> f64 {
    1.0 - 1.0 / (1.0 + x / midpoint)
}

/// A derived raw value that overflowed cannot be stored or serialized,
/// so it is reported as missing instead.
fn present(name: &str, raw: f64, normalized: f64) -> FeatureValue {
    if !raw.is_finite() || !normalized.is_finite() {
        return FeatureValue::missing(format!("{name} overflows"));
    }
    FeatureValue::Present {
        raw,
        normalized: normalized.clamp(0.0, 1.0),
    }
}

// --- Dimensions ---

struct DetectionScore;
impl Extractor for DetectionScore {
    fn name(&self) -> &'static str {
        "detection_score"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        present(self.name(), alert.detection_score, alert.detection_score)
    }
}

/// Log-scaled USD notional. Falls back to summing `amount_usd` over samples.
struct TotalVolume;
impl Extractor for TotalVolume {
    fn name(&self) -> &'static str {
        "total_volume_usd"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        let volume = match non_negative(alert, &["total_volume_usd", "volume_usd"]) {
            Ok(Some(v)) => v,
            Ok(None) => match sample_volume(&alert.samples) {
                Some(v) => v,
                None => return FeatureValue::missing("total_volume_usd not reported"),
            },
            Err(reason) => return FeatureValue::missing(reason),
        };
        let scaled = (1.0 + volume).log10() / (1.0 + VOLUME_CAP_USD).log10();
        present(self.name(), volume, scaled.min(1.0))
    }
}

fn sample_volume(samples: &[Value]) -> Option<f64> {
    let amounts: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.get("amount_usd").and_then(as_number))
        .filter(|a| *a >= 0.0)
        .collect();
    if amounts.is_empty() {
        None
    } else {
        Some(amounts.iter().sum())
    }
}

/// Low counterparty diversity is the risky direction.
struct CounterpartyCount;
impl Extractor for CounterpartyCount {
    fn name(&self) -> &'static str {
        "counterparty_count"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        let keys = ["counterparty_count", "counterparty_diversity"];
        let count = match non_negative(alert, &keys) {
            Ok(Some(c)) => c,
            Ok(None) => match sample_counterparties(&alert.samples) {
                Some(c) => c,
                None => return FeatureValue::missing("counterparty_count not reported"),
            },
            Err(reason) => return FeatureValue::missing(reason),
        };
        let clipped = count.clamp(1.0, COUNTERPARTY_CAP);
        present(self.name(), count, 1.0 - (clipped - 1.0) / (COUNTERPARTY_CAP - 1.0))
    }
}

fn sample_counterparties(samples: &[Value]) -> Option<f64> {
    let distinct: BTreeSet<&str> = samples
        .iter()
        .filter_map(|s| s.get("counterparty").and_then(Value::as_str))
        .collect();
    if distinct.is_empty() {
        None
    } else {
        Some(distinct.len() as f64)
    }
}

struct RoundtripCount;
impl Extractor for RoundtripCount {
    fn name(&self) -> &'static str {
        "roundtrip_count"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        match non_negative(alert, &["roundtrip_count"]) {
            // ~0.5 at 10 roundtrips, ~0.9 at 90
            Ok(Some(r)) => present(self.name(), r, saturating(r, 10.0)),
            Ok(None) => FeatureValue::missing("roundtrip_count not reported"),
            Err(reason) => FeatureValue::missing(reason),
        }
    }
}

struct SelfTradeRatio;
impl Extractor for SelfTradeRatio {
    fn name(&self) -> &'static str {
        "self_trade_ratio"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        match non_negative(alert, &["self_trade_ratio"]) {
            Ok(Some(r)) if r <= 1.0 => present(self.name(), r, r),
            Ok(Some(r)) => {
                FeatureValue::missing(format!("self_trade_ratio {r} outside [0, 1]"))
            }
            Ok(None) => FeatureValue::missing("self_trade_ratio not reported"),
            Err(reason) => FeatureValue::missing(reason),
        }
    }
}

/// Trades per minute, or derived from the mean gap between trades.
struct Velocity;
impl Extractor for Velocity {
    fn name(&self) -> &'static str {
        "velocity"
    }
    fn extract(&self, alert: &Alert) -> FeatureValue {
        let velocity = match non_negative(alert, &["velocity"]) {
            Ok(Some(v)) => v,
            Ok(None) => match non_negative(alert, &["avg_time_between_trades_sec"]) {
                Ok(Some(gap)) if gap > 0.0 => 60.0 / gap,
                Ok(Some(_)) => {
                    return FeatureValue::missing("avg_time_between_trades_sec is zero");
                }
                Ok(None) => return FeatureValue::missing("velocity not reported"),
                Err(reason) => return FeatureValue::missing(reason),
            },
            Err(reason) => return FeatureValue::missing(reason),
        };
        // ~0.5 at 6 trades/min
        present(self.name(), velocity, saturating(velocity, 6.0))
    }
}
