//! Periodic fan-out of the latest frame
//!
//! Each tick reads the newest frame once and offers it to every registered
//! client without waiting. A client whose queue is full skips the frame; a
//! client whose writer has gone is removed after the pass.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::registry::{ClientId, Offer, SharedRegistry};
use crate::capture::SharedFrameBuffer;

/// Result of a single broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sequence number of the frame sent, if any
    pub sequence: Option<u64>,
    pub queued: usize,
    pub skipped: usize,
    pub removed: Vec<ClientId>,
}

/// Offer the latest frame to every client once
pub fn broadcast_tick(buffer: &SharedFrameBuffer, registry: &SharedRegistry) -> TickReport {
    let mut report = TickReport::default();

    let frame = match buffer.read() {
        Some(frame) => frame,
        None => return report,
    };
    let clients = registry.snapshot();
    if clients.is_empty() {
        return report;
    }
    report.sequence = Some(frame.sequence);

    for client in &clients {
        match client.offer(Arc::clone(&frame)) {
            Offer::Queued => report.queued += 1,
            Offer::Skipped => report.skipped += 1,
            Offer::Closed => report.removed.push(client.id),
        }
    }

    for id in &report.removed {
        if let Some(client) = registry.remove(id) {
            warn!("Dropping client {} ({}): writer closed", client.id, client.addr);
        }
    }

    report
}

/// Background task that calls [`broadcast_tick`] at a fixed period
pub struct BroadcastLoop {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl BroadcastLoop {
    /// Spawn on the current tokio runtime
    pub fn spawn(buffer: SharedFrameBuffer, registry: SharedRegistry, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Broadcast loop started ({:?} period)", period);

            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let report = broadcast_tick(&buffer, &registry);
                        ticks += 1;
                        if report.skipped > 0 {
                            debug!(
                                "Tick {}: {} queued, {} skipped",
                                ticks, report.queued, report.skipped
                            );
                        }
                    }
                }
            }

            info!("Broadcast loop stopped after {} ticks", ticks);
        });

        Self {
            handle: Some(handle),
            stop_tx: Some(stop_tx),
        }
    }

    /// Stop ticking and wait for the task to finish
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Broadcast task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for BroadcastLoop {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
