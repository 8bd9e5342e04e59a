use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::core::{Action, DecisionRecord, RiskLevel};

/// Payload sent for FREEZE and ESCALATE decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionNotice {
    pub decision_id: String,
    pub risk_level: RiskLevel,
    pub action: Action,
}

impl From<&DecisionRecord> for DecisionNotice {
    fn from(record: &DecisionRecord) -> Self {
        Self {
            decision_id: record.decision_id.clone(),
            risk_level: record.risk_level,
            action: record.action,
        }
    }
}

/// Fire-and-forget notification fan-out (desktop + webhook) with a
/// per-address cooldown that a more severe action cuts through.
/// Delivery failures are logged, never returned.
pub struct Notifier {
    enabled: bool,
    desktop: bool,
    webhook_url: Option<String>,
    cooldown: Duration,
    /// Last notice per address still inside its cooldown window.
    last_sent: Mutex<HashMap<String, (Instant, Action)>>,
    client: Client,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            desktop: config.desktop,
            webhook_url: config.webhook_url.clone(),
            cooldown: Duration::from_secs(config.cooldown_seconds),
            last_sent: Mutex::new(HashMap::new()),
            client: Client::new(),
        }
    }

    /// Dispatch a notice for an urgent decision.
    /// Returns true if a notice was dispatched, false if skipped.
    pub fn notify(&self, record: &DecisionRecord) -> bool {
        if !self.enabled || !record.action.is_urgent() {
            return false;
        }
        if !self.check_cooldown(&record.address, record.action) {
            debug!(address = %record.address, "notification suppressed by cooldown");
            return false;
        }

        let notice = DecisionNotice::from(record);
        if self.desktop {
            self.send_desktop(&notice, &record.address);
        }
        if let Some(url) = &self.webhook_url {
            self.send_webhook(url, notice);
        }
        true
    }

    /// Check and update the address cooldown. Returns true if enough time
    /// has passed or `action` is more severe than the last notice sent.
    fn check_cooldown(&self, address: &str, action: Action) -> bool {
        let mut last = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        last.retain(|_, (sent, _)| now.duration_since(*sent) < self.cooldown);
        if let Some((_, prev)) = last.get(address) {
            if action <= *prev {
                return false;
            }
        }
        last.insert(address.to_string(), (now, action));
        true
    }

    fn send_desktop(&self, notice: &DecisionNotice, address: &str) {
        let title = format!("RiskLens: {} ({})", notice.action, notice.risk_level);
        let short: String = address.chars().take(12).collect();
        let body = format!("{short} | decision {}", notice.decision_id);

        // Background thread so the pipeline never waits on the desktop bus
        std::thread::spawn(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .show()
            {
                debug!("Desktop notification failed: {e}");
            }
        });
    }

    fn send_webhook(&self, url: &str, notice: DecisionNotice) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, webhook notification skipped");
            return;
        };
        let client = self.client.clone();
        let url = url.to_string();
        handle.spawn(async move {
            match client.post(&url).json(&notice).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(decision_id = %notice.decision_id, "webhook notified");
                }
                Ok(resp) => warn!(
                    status = %resp.status(),
                    decision_id = %notice.decision_id,
                    "webhook rejected notification"
                ),
                Err(e) => warn!(
                    error = %e,
                    decision_id = %notice.decision_id,
                    "webhook notification failed"
                ),
            }
        });
    }
}
