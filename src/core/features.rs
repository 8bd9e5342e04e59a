use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialized status of a dimension that could not be extracted.
pub const MISSING_FEATURE: &str = "MISSING_FEATURE";

/// Value of one risk dimension.
///
/// `normalized` is risk-oriented in `[0, 1]`: higher always means riskier,
/// whatever the direction of the raw signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum FeatureValue {
    #[serde(rename = "PRESENT")]
    Present { raw: f64, normalized: f64 },
    #[serde(rename = "MISSING_FEATURE")]
    Missing { reason: String },
}

impl FeatureValue {
    pub fn missing(reason: impl Into<String>) -> Self {
        FeatureValue::Missing {
            reason: reason.into(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing { .. })
    }
}

/// Normalized features of one alert, keyed by dimension name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, FeatureValue>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FeatureValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }

    pub fn raw(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            FeatureValue::Present { raw, .. } => Some(*raw),
            FeatureValue::Missing { .. } => None,
        }
    }

    pub fn normalized(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            FeatureValue::Present { normalized, .. } => Some(*normalized),
            FeatureValue::Missing { .. } => None,
        }
    }

    /// Dimensions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Missing dimensions with their reasons, in name order.
    pub fn missing(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().filter_map(|(k, v)| match v {
            FeatureValue::Missing { reason } => Some((k.as_str(), reason.as_str())),
            FeatureValue::Present { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
