//! Node background tasks: pairing until a gateway answers, then periodic
//! file sync.

use std::sync::Arc;
use std::time::Duration;

use loralink_core::DeviceId;
use loralink_services::{FileSender, NodePairing, RadioLink, TransferMode};
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

/// Drive the node pairing state machine until it reports paired.
pub async fn pairing_loop(
    pairing: Arc<NodePairing>,
    link: RadioLink,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_ms = interval.as_millis() as u64, "pairing starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {}
        }

        if let Some(gateway) = pairing.gateway() {
            tracing::info!(gateway = %gateway, "paired, pairing task done");
            return;
        }
        if let Some(request) = pairing.poll(Instant::now()) {
            if let Err(e) = link.send(&request) {
                tracing::warn!(error = %e, "failed to broadcast pairing request");
            }
        }
    }
}

/// Once paired, push each configured file in sync mode on every interval.
///
/// A failed file is logged and retried on the next pass; the resume record
/// only advances on success.
pub async fn sync_loop(
    sender: Arc<FileSender>,
    files: Vec<String>,
    interval: Duration,
    mut paired: watch::Receiver<Option<DeviceId>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let gateway = tokio::select! {
        _ = shutdown.recv() => return,
        r = paired.wait_for(Option::is_some) => match r {
            Ok(gateway) => *gateway,
            Err(_) => return,
        },
    };
    tracing::info!(gateway = ?gateway, files = files.len(), interval_secs = interval.as_secs(), "file sync starting");

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {}
        }

        for path in &files {
            match sender.send_file(path, TransferMode::Sync).await {
                Ok(report) => tracing::info!(
                    path = %path,
                    bytes = report.bytes,
                    chunks = report.chunks,
                    offset = report.end_offset,
                    "sync pass complete"
                ),
                Err(e) => tracing::warn!(path = %path, error = %e, "sync pass failed"),
            }
        }
    }
}
