//! Live fleet broadcast
//!
//! Each connected viewer gets its own loop that pushes the fleet in batches
//! of `batch_size` ships, one batch per pacing interval. The first sweep runs
//! at the fast interval, every later sweep at the slow one. Before each batch
//! the loop checks whether any ship was written since it last looked and, if
//! so, pushes the recently updated ships as an extra `is_update` frame.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::ChangeDetectionCache,
    config::BroadcastConfig,
    database::ShipStore,
    errors::HarborError,
    models::{FleetEntry, FleetShip},
};

mod viewer;

pub use viewer::{RelayViewer, WsViewer};

/// Outbound side of one viewer connection
#[async_trait]
pub trait ViewerChannel: Send {
    async fn send(&mut self, frame: String) -> Result<(), HarborError>;

    /// Resolves once the viewer's inbound side fails or closes.
    ///
    /// Must be cancel safe, the loop polls it only while pausing.
    async fn receive_failure(&mut self) -> HarborError;

    /// Re-establish the connection after a failure
    async fn reconnect(&mut self) -> Result<(), HarborError>;
}

/// Why a broadcast loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Disconnected,
}

enum Delivery {
    Sent,
    Reconnected,
}

pub struct LiveBroadcastLoop<V> {
    store: Arc<dyn ShipStore>,
    changes: Arc<ChangeDetectionCache>,
    config: BroadcastConfig,
    viewer: V,
    cancel: CancellationToken,
}

impl<V: ViewerChannel> LiveBroadcastLoop<V> {
    pub fn new(
        store: Arc<dyn ShipStore>,
        changes: Arc<ChangeDetectionCache>,
        config: BroadcastConfig,
        viewer: V,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            changes,
            config,
            viewer,
            cancel,
        }
    }

    /// Run until cancelled or until the viewer cannot be reconnected.
    pub async fn run(mut self) -> LoopExit {
        let batch_size = self.config.batch_size.max(1) as u64;
        let mut fleet: Option<u64> = None;
        let mut refresh_at = Instant::now();
        let mut observed: Option<DateTime<Utc>> = None;
        let mut interval = self.config.fast_interval;
        let mut batch: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            if fleet.is_none() || Instant::now() >= refresh_at {
                let refreshed = tokio::select! {
                    _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                    size = refresh_fleet_size(&self.changes, self.store.as_ref()) => size,
                };
                match refreshed {
                    Ok(size) => {
                        fleet = Some(size);
                        refresh_at = Instant::now() + self.config.fleet_refresh_interval;
                    }
                    // Deadline stays put, the next pass tries again
                    Err(e) => warn!("Failed to refresh fleet size, keeping {:?}: {}", fleet, e),
                }
            }
            let Some(fleet_size) = fleet else {
                if let Err(exit) = self.pause(interval).await {
                    return exit;
                }
                continue;
            };

            let batches = fleet_size.div_ceil(batch_size);
            if batches == 0 {
                interval = self.config.slow_interval;
                if let Err(exit) = self.pause(interval).await {
                    return exit;
                }
                continue;
            }
            // The fleet may have shrunk since the last refresh
            if batch >= batches {
                batch = 0;
            }

            let changed = tokio::select! {
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                changed = self.changes.changes_since(self.store.as_ref(), observed) => changed,
            };
            match changed {
                Ok((newest, delta)) => {
                    if let Some(delta) = delta {
                        debug!("Pushing {} updated ships", delta.ships.len());
                        match self.deliver(frame(delta.ships, true)).await {
                            Ok(Delivery::Sent) => {}
                            // `observed` is unchanged, so the next pass rebuilds this frame
                            Ok(Delivery::Reconnected) => continue,
                            Err(exit) => return exit,
                        }
                    }
                    observed = newest;
                }
                Err(e) => warn!("Failed to check fleet changes: {}", e),
            }

            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            let offset = batch * batch_size;
            let ships = tokio::select! {
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                ships = self.store.fleet_batch(offset, batch_size) => ships,
            };
            let ships = match ships {
                Ok(ships) => ships,
                Err(e) => {
                    warn!("Failed to fetch fleet batch {}/{}: {}", batch + 1, batches, e);
                    if let Err(exit) = self.pause(interval).await {
                        return exit;
                    }
                    continue;
                }
            };

            match self.deliver(frame(ships, false)).await {
                Ok(Delivery::Sent) => {}
                // Same batch again on the new connection
                Ok(Delivery::Reconnected) => continue,
                Err(exit) => return exit,
            }

            batch += 1;
            if batch >= batches {
                batch = 0;
                if interval != self.config.slow_interval {
                    debug!("First sweep done, switching to {:?}", self.config.slow_interval);
                }
                interval = self.config.slow_interval;
            }

            if let Err(exit) = self.pause(interval).await {
                return exit;
            }
        }
    }

    async fn deliver(
        &mut self,
        frame: Result<String, serde_json::Error>,
    ) -> Result<Delivery, LoopExit> {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode fleet frame: {}", e);
                return Ok(Delivery::Sent);
            }
        };

        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoopExit::Cancelled),
            sent = self.viewer.send(frame) => sent,
        };
        match sent {
            Ok(()) => Ok(Delivery::Sent),
            Err(e) => {
                warn!("Failed to push frame to viewer: {}", e);
                self.reconnect().await?;
                Ok(Delivery::Reconnected)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), LoopExit> {
        let reconnected = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoopExit::Cancelled),
            reconnected = self.viewer.reconnect() => reconnected,
        };
        match reconnected {
            Ok(()) => {
                info!("Viewer reconnected");
                Ok(())
            }
            Err(e) => {
                warn!("Viewer reconnect failed, stopping broadcast: {}", e);
                Err(LoopExit::Disconnected)
            }
        }
    }

    /// Sleep for `interval`, waking early on cancellation or a viewer failure.
    async fn pause(&mut self, interval: Duration) -> Result<(), LoopExit> {
        if self.cancel.is_cancelled() {
            return Err(LoopExit::Cancelled);
        }

        let failure = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoopExit::Cancelled),
            _ = tokio::time::sleep(interval) => return Ok(()),
            failure = self.viewer.receive_failure() => failure,
        };

        warn!("Viewer connection failed: {}", failure);
        self.reconnect().await
    }
}

async fn refresh_fleet_size(
    changes: &ChangeDetectionCache,
    store: &dyn ShipStore,
) -> Result<u64, HarborError> {
    changes.invalidate_fleet_size().await;
    let size = changes.fleet_size(store).await?;
    debug!("Fleet size {}", size);
    Ok(size)
}

fn frame(ships: Vec<FleetShip>, is_update: bool) -> Result<String, serde_json::Error> {
    let entries: Vec<FleetEntry> = ships
        .into_iter()
        .map(|ship| FleetEntry::from_fleet_ship(ship, is_update))
        .collect();
    serde_json::to_string(&entries)
}
