use std::time::Duration;

use crate::core::Stage;

/// Failures surfaced by the decision engine before a record is produced.
///
/// A missing feature is deliberately absent here: it is recorded as a
/// limitation on the decision and the pipeline carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Structurally malformed input, rejected before normalization.
    #[error("invalid alert {}: {reason}", .alert_id.as_deref().unwrap_or("<unidentified>"))]
    InvalidAlert {
        alert_id: Option<String>,
        reason: String,
    },

    /// A rule set failed validation and was not installed.
    #[error("invalid rule set version {version}: {}", .reasons.join("; "))]
    InvalidRuleSet { version: u64, reasons: Vec<String> },

    /// The evaluation ran past its wall-clock budget.
    #[error("alert {alert_id} exceeded its {}ms budget after stage {stage}", .budget.as_millis())]
    EvaluationTimeout {
        alert_id: String,
        stage: Stage,
        budget: Duration,
    },
}

impl EngineError {
    pub fn invalid_alert(alert_id: Option<&str>, reason: impl Into<String>) -> Self {
        EngineError::InvalidAlert {
            alert_id: alert_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn invalid_ruleset(version: u64, reason: impl Into<String>) -> Self {
        EngineError::InvalidRuleSet {
            version,
            reasons: vec![reason.into()],
        }
    }

    /// Alert the failure belongs to, when one was identified.
    pub fn alert_id(&self) -> Option<&str> {
        match self {
            EngineError::InvalidAlert { alert_id, .. } => alert_id.as_deref(),
            EngineError::EvaluationTimeout { alert_id, .. } => Some(alert_id),
            EngineError::InvalidRuleSet { .. } => None,
        }
    }

    /// Last pipeline stage completed before the failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::InvalidAlert { .. } => Some(Stage::Received),
            EngineError::EvaluationTimeout { stage, .. } => Some(*stage),
            EngineError::InvalidRuleSet { .. } => None,
        }
    }
}
