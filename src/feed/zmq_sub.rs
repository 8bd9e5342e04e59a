use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::parse_alert;
use crate::config::FeedConfig;
use crate::core::Alert;

/// Poll timeout; also how often a closed channel is noticed while idle.
const POLL_TIMEOUT_MS: i64 = 1000;

/// Start the ZMQ alert subscriber in a blocking thread (zmq crate is synchronous).
/// Decoded alerts go into the provided channel.
///
/// Messages are multipart `[topic, json]`. Payloads that fail to decode are
/// logged and dropped; the subscriber keeps running until the receiving side
/// of the channel is closed.
pub fn start_zmq_subscriber(
    config: FeedConfig,
    tx: mpsc::UnboundedSender<Alert>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let ctx = zmq::Context::new();

        let sock = match ctx.socket(zmq::SUB) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to create alert socket: {e}");
                return;
            }
        };
        if let Err(e) = sock.connect(&config.endpoint) {
            error!("Failed to connect alert feed at {}: {e}", config.endpoint);
            return;
        }
        if let Err(e) = sock.set_subscribe(config.topic.as_bytes()) {
            error!("Failed to subscribe to topic {}: {e}", config.topic);
            return;
        }
        info!(endpoint = %config.endpoint, topic = %config.topic, "ZMQ alert subscriber connected");

        let mut received: u64 = 0;
        let mut dropped: u64 = 0;

        loop {
            if tx.is_closed() {
                info!("Channel closed, stopping ZMQ subscriber");
                return;
            }

            let readable = {
                let mut items = [sock.as_poll_item(zmq::POLLIN)];
                match zmq::poll(&mut items, POLL_TIMEOUT_MS) {
                    Ok(_) => items[0].is_readable(),
                    Err(e) => {
                        error!("ZMQ poll error: {e}");
                        std::thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                }
            };
            if !readable {
                continue;
            }

            match sock.recv_multipart(zmq::DONTWAIT) {
                Ok(msg) if msg.len() >= 2 && msg[0] == config.topic.as_bytes() => {
                    match parse_alert(&msg[1]) {
                        Ok(alert) => {
                            received += 1;
                            if tx.send(alert).is_err() {
                                info!("Channel closed, stopping ZMQ subscriber");
                                return;
                            }
                        }
                        Err(e) => {
                            dropped += 1;
                            warn!(error = %e, received, dropped, "dropping alert payload");
                        }
                    }
                }
                Ok(msg) => {
                    warn!("Unexpected alert message format, parts: {}", msg.len());
                }
                Err(e) => {
                    if e != zmq::Error::EAGAIN {
                        error!("ZMQ alert recv error: {e}");
                    }
                }
            }
        }
    })
}
