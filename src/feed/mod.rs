//! Streaming transport for inbound alerts.

pub mod zmq_sub;

use serde_json::Value;

use crate::core::Alert;
use crate::error::EngineError;

/// Decode one JSON alert payload from the wire.
///
/// Only decoding happens here; structural validation is the engine's job,
/// so a decodable but incomplete alert still reaches it and is rejected
/// there with its id attached.
pub fn parse_alert(payload: &[u8]) -> Result<Alert, EngineError> {
    serde_json::from_slice(payload).map_err(|e| {
        let alert_id = payload_alert_id(payload);
        EngineError::invalid_alert(alert_id.as_deref(), format!("undecodable payload: {e}"))
    })
}

/// Best-effort id of a payload that did not decode as an alert.
fn payload_alert_id(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    let id = value.get("alert_id")?.as_str()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}
