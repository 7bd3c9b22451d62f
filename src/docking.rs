//! Docking state machine
//!
//! Turns one position report into the ship's next docking status, the
//! land/water reading to persist and the side effects the report requires.
//! The persisted `on_ground` flag is the negation of the water reading:
//! 1 means the fix was on land.

use tracing::debug;

use crate::{
    errors::HarborError,
    geofence::Coordinate,
    models::{DockStatus, ShipStatus},
    water::WaterDetection,
};

/// The parts of a ship row the transition depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipSnapshot {
    pub status: ShipStatus,
    pub on_ground: i16,
}

/// Which rule decided a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Inside the geofence without a standing check-in
    Arrived,
    /// Inside the geofence and already checked in
    Docked,
    /// Left the geofence over water after a check-in
    Departed,
    /// Left the geofence over land after a check-in
    LeftOverLand,
    /// Outside the geofence, checked in and last seen ashore
    GroundedOutside,
    /// Outside the geofence without a standing check-in
    Roaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    CheckIn,
    CheckOut,
}

/// Outcome of one report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub branch: Branch,
    pub status: ShipStatus,
    pub is_water: bool,
    /// Docked log row to append
    pub docked_log: Option<DockStatus>,
    pub notification: Option<NotificationKind>,
}

impl Transition {
    /// Value for the `on_ground` columns
    pub fn on_ground(&self) -> i16 {
        if self.is_water {
            0
        } else {
            1
        }
    }
}

/// Decide the transition for a report at `point`.
///
/// `inside` is the geofence containment of `point`, `last_docked` the status
/// of the ship's newest docked log. The classifier is consulted only by the
/// rules that need it; its errors propagate unchanged.
pub async fn transition(
    ship: ShipSnapshot,
    last_docked: Option<DockStatus>,
    point: Coordinate,
    inside: bool,
    water: &dyn WaterDetection,
) -> Result<Transition, HarborError> {
    let checked_in = last_docked == Some(DockStatus::Checkin);

    let transition = match (inside, checked_in) {
        (true, false) => Transition {
            branch: Branch::Arrived,
            status: ShipStatus::Checkin,
            // First fix inside the perimeter counts as afloat
            is_water: true,
            docked_log: Some(DockStatus::Checkin),
            notification: Some(NotificationKind::CheckIn),
        },
        (true, true) => Transition {
            branch: Branch::Docked,
            status: ShipStatus::Checkin,
            is_water: water.is_water(point).await?,
            docked_log: None,
            notification: None,
        },
        (false, true) if ship.on_ground != 1 => {
            if water.is_water(point).await? {
                Transition {
                    branch: Branch::Departed,
                    status: ShipStatus::Checkout,
                    is_water: true,
                    docked_log: Some(DockStatus::Checkout),
                    notification: Some(NotificationKind::CheckOut),
                }
            } else {
                // Docked history stays at checkin
                Transition {
                    branch: Branch::LeftOverLand,
                    status: ShipStatus::OutOfScope,
                    is_water: false,
                    docked_log: None,
                    notification: None,
                }
            }
        }
        // Ashore and checked in: keep whatever status the ship had and skip
        // classification. Suppresses GPS jitter while hauled out.
        (false, true) => Transition {
            branch: Branch::GroundedOutside,
            status: ship.status,
            is_water: false,
            docked_log: None,
            notification: None,
        },
        (false, false) => Transition {
            branch: Branch::Roaming,
            status: ShipStatus::OutOfScope,
            is_water: water.is_water(point).await?,
            docked_log: None,
            notification: None,
        },
    };

    debug!(
        "Transition {:?}: {} -> {}, on_ground={}",
        transition.branch,
        ship.status,
        transition.status,
        transition.on_ground()
    );
    Ok(transition)
}
