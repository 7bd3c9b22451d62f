//! Data models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HarborError;

/// Docking status of a ship relative to the harbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStatus {
    Checkin,
    Checkout,
    OutOfScope,
}

impl ShipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipStatus::Checkin => "checkin",
            ShipStatus::Checkout => "checkout",
            ShipStatus::OutOfScope => "out_of_scope",
        }
    }
}

impl fmt::Display for ShipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipStatus {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" => Ok(ShipStatus::Checkin),
            "checkout" => Ok(ShipStatus::Checkout),
            // Older rows were written with a space
            "out_of_scope" | "out of scope" => Ok(ShipStatus::OutOfScope),
            other => Err(HarborError::Validation(format!("unknown ship status {other}"))),
        }
    }
}

/// Status carried by a docked log row. Only check-in and check-out are ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockStatus {
    Checkin,
    Checkout,
}

impl DockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DockStatus::Checkin => "checkin",
            DockStatus::Checkout => "checkout",
        }
    }
}

impl FromStr for DockStatus {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" => Ok(DockStatus::Checkin),
            "checkout" => Ok(DockStatus::Checkout),
            other => Err(HarborError::Validation(format!("unknown dock status {other}"))),
        }
    }
}

impl From<DockStatus> for ShipStatus {
    fn from(value: DockStatus) -> Self {
        match value {
            DockStatus::Checkin => ShipStatus::Checkin,
            DockStatus::Checkout => ShipStatus::Checkout,
        }
    }
}

/// Primary key of a ship row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipId(pub i64);

impl ShipId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ShipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A paired vessel
#[derive(Debug, Clone, PartialEq)]
pub struct Ship {
    pub id: ShipId,
    pub name: String,
    pub device_id: String,
    pub status: ShipStatus,
    /// Latitude in decimal degrees, as reported by the device
    pub current_lat: String,
    /// Longitude in decimal degrees, as reported by the device
    pub current_long: String,
    /// 1 when the last fix was classified as land, 0 for water
    pub on_ground: i16,
    /// Push notification token of the paired device
    pub firebase_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the check-in / check-out history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipDockedLog {
    pub id: i64,
    pub ship_id: ShipId,
    pub lat: String,
    pub long: String,
    pub status: DockStatus,
    pub is_inspected: i16,
    pub is_reported: i16,
    pub created_at: DateTime<Utc>,
}

/// One entry of the raw position trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipLocationLog {
    pub id: i64,
    pub ship_id: ShipId,
    pub lat: String,
    pub long: String,
    pub is_mocked: i16,
    pub on_ground: i16,
    pub created_at: DateTime<Utc>,
}

/// Everything a single ingestion writes, committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionWrite {
    pub ship_id: ShipId,
    pub lat: String,
    pub long: String,
    pub status: ShipStatus,
    pub on_ground: i16,
    pub is_mocked: i16,
    /// Docked log row to append, if the report changed the docking status
    pub docked_log: Option<DockStatus>,
}

/// Harbor-wide settings used for notification text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarborSettings {
    pub harbor_code: i32,
    pub harbor_name: String,
}

/// Inbound device report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    pub device_id: String,
    pub long: String,
    pub lat: String,
    #[serde(default, deserialize_with = "serde_helpers::deserialize_flag")]
    pub is_mocked: i16,
}

/// Ship row joined with its most recent water fix
#[derive(Debug, Clone, PartialEq)]
pub struct FleetShip {
    pub ship: Ship,
    pub water_fix: Option<WaterFix>,
}

/// Latest location-log entry classified as water
#[derive(Debug, Clone, PartialEq)]
pub struct WaterFix {
    pub lat: String,
    pub long: String,
    pub on_ground: i16,
    pub created_at: DateTime<Utc>,
}

/// One element of an outbound stream frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub ship_id: ShipId,
    pub ship_name: String,
    pub device_id: String,
    /// `[long, lat]`
    pub geo: [String; 2],
    pub on_ground: i16,
    pub is_update: bool,
}

impl FleetEntry {
    /// Build a stream entry, preferring the latest water fix when the ship's
    /// own position is a stale on-ground reading.
    pub fn from_fleet_ship(fleet_ship: FleetShip, is_update: bool) -> Self {
        let FleetShip { ship, water_fix } = fleet_ship;
        let mut lat = ship.current_lat;
        let mut long = ship.current_long;
        let mut on_ground = ship.on_ground;

        if let Some(fix) = water_fix {
            let moved = fix.lat != lat || fix.long != long;
            if ship.on_ground == 1
                && !fix.lat.is_empty()
                && !fix.long.is_empty()
                && moved
                && fix.created_at < ship.updated_at
            {
                lat = fix.lat;
                long = fix.long;
                on_ground = fix.on_ground;
            }
        }

        Self {
            ship_id: ship.id,
            ship_name: ship.name,
            device_id: ship.device_id,
            geo: [long, lat],
            on_ground,
            is_update,
        }
    }
}

/// Paging for history lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogPage {
    pub offset: i64,
    pub limit: i64,
}

impl Default for LogPage {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

mod serde_helpers {
    use serde::{Deserialize, Deserializer};

    /// Devices send the mocked flag either as a boolean or as 0/1
    pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<i16, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Int(i64),
        }

        Ok(match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => b as i16,
            Flag::Int(i) => (i != 0) as i16,
        })
    }
}
