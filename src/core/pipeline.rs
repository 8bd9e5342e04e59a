use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::{Alert, DecisionRecord};
use crate::db::DecisionStore;
use crate::engine::DecisionEngine;
use crate::error::EngineError;
use crate::notifications::Notifier;

/// Counters reported when the pipeline shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub recorded: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub store_failures: u64,
    pub notified: u64,
}

type Evaluation = Result<Result<DecisionRecord, EngineError>, JoinError>;

/// Run the pipeline: pull alerts, evaluate, append finished records, notify.
///
/// Evaluations run on blocking tasks, at most `max_in_flight` at a time.
/// Only finished records reach the store; failures are counted and logged.
/// Returns once the alert channel closes and in-flight work has drained.
pub async fn run_pipeline(
    mut rx: mpsc::UnboundedReceiver<Alert>,
    engine: Arc<DecisionEngine>,
    store: Arc<dyn DecisionStore>,
    notifier: Arc<Notifier>,
    max_in_flight: usize,
) -> PipelineStats {
    let limit = max_in_flight.max(1);
    let mut in_flight: JoinSet<Result<DecisionRecord, EngineError>> = JoinSet::new();
    let mut stats = PipelineStats::default();

    info!("Pipeline started, waiting for alerts...");

    while let Some(alert) = rx.recv().await {
        stats.received += 1;

        while in_flight.len() >= limit {
            if let Some(done) = in_flight.join_next().await {
                finish(done, store.as_ref(), &notifier, &mut stats);
            }
        }

        let engine = Arc::clone(&engine);
        in_flight.spawn_blocking(move || engine.evaluate(&alert));

        while let Some(done) = in_flight.try_join_next() {
            finish(done, store.as_ref(), &notifier, &mut stats);
        }

        if stats.received % 1000 == 0 {
            info!(
                received = stats.received,
                recorded = stats.recorded,
                "Pipeline progress"
            );
        }
    }

    while let Some(done) = in_flight.join_next().await {
        finish(done, store.as_ref(), &notifier, &mut stats);
    }

    info!(
        received = stats.received,
        recorded = stats.recorded,
        rejected = stats.rejected,
        timed_out = stats.timed_out,
        store_failures = stats.store_failures,
        "Pipeline shutting down"
    );
    stats
}

fn finish(
    done: Evaluation,
    store: &dyn DecisionStore,
    notifier: &Notifier,
    stats: &mut PipelineStats,
) {
    let record = match done {
        Ok(Ok(record)) => record,
        Ok(Err(e @ EngineError::EvaluationTimeout { .. })) => {
            stats.timed_out += 1;
            warn!(alert_id = e.alert_id().unwrap_or_default(), error = %e, "evaluation timed out");
            return;
        }
        Ok(Err(e)) => {
            stats.rejected += 1;
            warn!(alert_id = e.alert_id().unwrap_or_default(), error = %e, "alert rejected");
            return;
        }
        Err(e) => {
            stats.rejected += 1;
            error!("Evaluation task failed: {e}");
            return;
        }
    };

    if let Err(e) = store.append(&record) {
        stats.store_failures += 1;
        error!(
            decision_id = %record.decision_id,
            alert_id = %record.alert_id,
            error = %e,
            "failed to append decision"
        );
        return;
    }
    stats.recorded += 1;
    debug!(decision_id = %record.decision_id, action = %record.action, "decision recorded");

    if notifier.notify(&record) {
        stats.notified += 1;
    }
}
