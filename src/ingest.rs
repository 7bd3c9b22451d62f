//! Location report ingestion

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    database::ShipStore,
    docking::{self, NotificationKind, ShipSnapshot, Transition},
    errors::HarborError,
    geofence::{Coordinate, Polygon},
    models::{IngestionWrite, LocationReport, Ship},
    notification::{notify_best_effort, Notification, NotificationGateway},
    water::WaterDetection,
};

const CHECK_IN_TITLE: &str = "HARBOR MONITOR - CHECK IN SUCCESS";
const CHECK_OUT_TITLE: &str = "HARBOR MONITOR - CHECK OUT SUCCESS";

/// Runs one device report through containment, the docking state machine,
/// persistence and notification.
#[derive(Clone)]
pub struct LocationIngestService {
    store: Arc<dyn ShipStore>,
    water: Arc<dyn WaterDetection>,
    notifications: Arc<dyn NotificationGateway>,
}

impl LocationIngestService {
    pub fn new(
        store: Arc<dyn ShipStore>,
        water: Arc<dyn WaterDetection>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            store,
            water,
            notifications,
        }
    }

    /// Ingest one report.
    ///
    /// Nothing is written unless the coordinates parse, the device is paired
    /// and the classifier (when consulted) answers. The notification is sent
    /// after the writes commit and never fails the call.
    pub async fn record(&self, report: LocationReport) -> Result<Transition, HarborError> {
        let point = Coordinate::parse(&report.lat, &report.long)?;
        let ship = self.store.ship_by_device(&report.device_id).await?;

        let polygon = Polygon::from_vertices(&self.store.harbor_polygon().await?)?;
        if polygon.is_degenerate() {
            warn!(
                "Harbor polygon has {} vertices, every report is outside",
                polygon.len()
            );
        }
        let inside = polygon.contains(point);

        let last_docked = self
            .store
            .last_docked_log(ship.id)
            .await?
            .map(|log| log.status);

        let transition = docking::transition(
            ShipSnapshot {
                status: ship.status,
                on_ground: ship.on_ground,
            },
            last_docked,
            point,
            inside,
            self.water.as_ref(),
        )
        .await?;

        self.store
            .record_ingestion(IngestionWrite {
                ship_id: ship.id,
                lat: report.lat,
                long: report.long,
                status: transition.status,
                on_ground: transition.on_ground(),
                is_mocked: report.is_mocked,
                docked_log: transition.docked_log,
            })
            .await?;

        debug!(
            "Recorded report of ship {} ({}): inside={}, status={}",
            ship.id, ship.device_id, inside, transition.status
        );

        if let Some(kind) = transition.notification {
            info!("Ship {} {:?}", ship.id, kind);
            self.notify(&ship, kind, Utc::now()).await;
        }

        Ok(transition)
    }

    async fn notify(&self, ship: &Ship, kind: NotificationKind, at: DateTime<Utc>) {
        let harbor_name = match self.store.harbor_settings().await {
            Ok(settings) => settings.harbor_name,
            Err(e) => {
                warn!("Skipping {:?} notification of ship {}: {}", kind, ship.id, e);
                return;
            }
        };

        notify_best_effort(
            self.notifications.as_ref(),
            notification_for(kind, &harbor_name, ship, at),
        )
        .await;
    }
}

/// Notification text for a docking event
pub fn notification_for(
    kind: NotificationKind,
    harbor_name: &str,
    ship: &Ship,
    at: DateTime<Utc>,
) -> Notification {
    let stamp = at.format("%y%m%d-%H%M");
    let (title, body) = match kind {
        NotificationKind::CheckIn => (
            CHECK_IN_TITLE,
            format!("Ship checked in to {harbor_name} Harbor at {stamp}"),
        ),
        NotificationKind::CheckOut => (
            CHECK_OUT_TITLE,
            format!("Ship checked out from {harbor_name} Harbor at {stamp}"),
        ),
    };

    Notification {
        title: title.to_string(),
        body,
        tokens: vec![ship.firebase_token.clone()],
    }
}
