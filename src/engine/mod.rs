//! The decision engine: alert in, [`DecisionRecord`] out.
//!
//! Each evaluation pins one rule set snapshot and runs
//! normalize → score → rules → resolve → compile over it. Nothing in the
//! pipeline touches disk, network or shared mutable state; the only
//! synchronization is the snapshot clone in [`ActiveRules`].

pub mod evidence;
pub mod normalize;
pub mod predicate;
pub mod resolve;
pub mod rules;
pub mod score;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::{Alert, DecisionRecord, Stage};
use crate::error::EngineError;
use crate::ruleset::{ActiveRules, RuleSet, RuleSetDefinition};

pub use evidence::EvidenceSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Wall-clock budget per evaluation; `None` disables the check.
    pub budget: Option<Duration>,
    pub evidence: EvidenceSettings,
}

/// Clock for `decided_at` that never runs backwards, at microsecond
/// precision so stored timestamps compare equal after a round trip.
#[derive(Debug, Default)]
struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let previous = self.last_micros.fetch_max(now, Ordering::SeqCst);
        DateTime::from_timestamp_micros(previous.max(now)).unwrap_or_else(Utc::now)
    }
}

pub struct DecisionEngine {
    rules: Arc<ActiveRules>,
    settings: EngineSettings,
    clock: MonotonicClock,
}

impl DecisionEngine {
    pub fn new(rules: Arc<ActiveRules>, settings: EngineSettings) -> Self {
        Self {
            rules,
            settings,
            clock: MonotonicClock::default(),
        }
    }

    pub fn rules(&self) -> &Arc<ActiveRules> {
        &self.rules
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Evaluate one alert against the rule set active right now.
    pub fn evaluate(&self, alert: &Alert) -> Result<DecisionRecord, EngineError> {
        let snapshot = self.rules.snapshot();
        self.evaluate_against(alert, &snapshot)
    }

    /// Evaluate against an explicit snapshot, e.g. to replay an audit on
    /// the version a record was stamped with.
    pub fn evaluate_against(
        &self,
        alert: &Alert,
        ruleset: &RuleSet,
    ) -> Result<DecisionRecord, EngineError> {
        let started = Instant::now();
        let checkpoint = |stage: Stage| self.check_budget(alert, started, stage);

        let features = normalize::normalize(alert)?;
        checkpoint(Stage::Normalized)?;

        let breakdown = score::score(&features, &ruleset.scoring);
        checkpoint(Stage::Scored)?;

        let outcome = rules::evaluate(&features, breakdown.score, alert.pattern, ruleset);
        checkpoint(Stage::RulesEvaluated)?;

        let resolution = resolve::resolve(&outcome.fired, breakdown.score, ruleset);
        checkpoint(Stage::Resolved)?;

        let findings = evidence::Findings {
            features: &features,
            breakdown: &breakdown,
            outcome: &outcome,
            resolution: &resolution,
        };
        let record = evidence::compile(
            alert,
            &findings,
            ruleset,
            &self.settings.evidence,
            self.clock.now(),
        );

        debug!(
            alert_id = %record.alert_id,
            decision_id = %record.decision_id,
            action = %record.action,
            risk_level = %record.risk_level,
            risk_score = record.risk_score,
            rule_version = record.rule_version,
            "alert evaluated"
        );
        Ok(record)
    }

    /// Re-evaluate a recorded alert on the active rules, producing a new
    /// record that names the one it corrects.
    pub fn supersede(&self, previous: &DecisionRecord) -> Result<DecisionRecord, EngineError> {
        let mut record = self.evaluate(&previous.alert_data)?;
        record.supersedes = Some(previous.decision_id.clone());
        info!(
            alert_id = %record.alert_id,
            superseded = %previous.decision_id,
            decision_id = %record.decision_id,
            from_version = previous.rule_version,
            to_version = record.rule_version,
            "decision superseded"
        );
        Ok(record)
    }

    /// Install a new rule set version. On rejection the engine keeps
    /// serving the previous version.
    pub fn reload(&self, def: RuleSetDefinition) -> Result<u64, EngineError> {
        match self.rules.install(def) {
            Ok(installed) => Ok(installed.version()),
            Err(e) => {
                warn!(
                    active_version = self.rules.version(),
                    error = %e,
                    "rule set rejected"
                );
                Err(e)
            }
        }
    }

    fn check_budget(
        &self,
        alert: &Alert,
        started: Instant,
        stage: Stage,
    ) -> Result<(), EngineError> {
        let Some(budget) = self.settings.budget else {
            return Ok(());
        };
        if started.elapsed() >= budget {
            return Err(EngineError::EvaluationTimeout {
                alert_id: alert.alert_id.clone(),
                stage,
                budget,
            });
        }
        Ok(())
    }
}
