// src/database/models.rs
use chrono::{DateTime, Utc};

use crate::{
    errors::HarborError,
    models::{FleetShip, HarborSettings, Ship, ShipDockedLog, ShipId, ShipLocationLog, WaterFix},
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ShipRow {
    id: i64,
    name: String,
    device_id: String,
    status: String,
    current_lat: String,
    current_long: String,
    on_ground: i16,
    firebase_token: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShipRow> for Ship {
    type Error = HarborError;

    fn try_from(row: ShipRow) -> Result<Self, Self::Error> {
        Ok(Ship {
            id: ShipId(row.id),
            name: row.name,
            device_id: row.device_id,
            status: row.status.parse()?,
            current_lat: row.current_lat,
            current_long: row.current_long,
            on_ground: row.on_ground,
            firebase_token: row.firebase_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Ship joined with its newest `on_ground = 0` location log
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FleetShipRow {
    #[sqlx(flatten)]
    ship: ShipRow,
    log_lat: Option<String>,
    log_long: Option<String>,
    log_on_ground: Option<i16>,
    log_created: Option<DateTime<Utc>>,
}

impl TryFrom<FleetShipRow> for FleetShip {
    type Error = HarborError;

    fn try_from(row: FleetShipRow) -> Result<Self, Self::Error> {
        let water_fix = match (row.log_lat, row.log_long, row.log_on_ground, row.log_created) {
            (Some(lat), Some(long), Some(on_ground), Some(created_at)) => Some(WaterFix {
                lat,
                long,
                on_ground,
                created_at,
            }),
            _ => None,
        };

        Ok(FleetShip {
            ship: row.ship.try_into()?,
            water_fix,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DockedLogRow {
    id: i64,
    ship_id: i64,
    lat: String,
    long: String,
    status: String,
    is_inspected: i16,
    is_reported: i16,
    created_at: DateTime<Utc>,
}

impl TryFrom<DockedLogRow> for ShipDockedLog {
    type Error = HarborError;

    fn try_from(row: DockedLogRow) -> Result<Self, Self::Error> {
        Ok(ShipDockedLog {
            id: row.id,
            ship_id: ShipId(row.ship_id),
            lat: row.lat,
            long: row.long,
            status: row.status.parse()?,
            is_inspected: row.is_inspected,
            is_reported: row.is_reported,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LocationLogRow {
    id: i64,
    ship_id: i64,
    lat: String,
    long: String,
    is_mocked: i16,
    on_ground: i16,
    created_at: DateTime<Utc>,
}

impl From<LocationLogRow> for ShipLocationLog {
    fn from(row: LocationLogRow) -> Self {
        ShipLocationLog {
            id: row.id,
            ship_id: ShipId(row.ship_id),
            lat: row.lat,
            long: row.long,
            is_mocked: row.is_mocked,
            on_ground: row.on_ground,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct GeofenceRow {
    pub lat: String,
    pub long: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SettingRow {
    harbor_code: i32,
    harbor_name: String,
}

impl From<SettingRow> for HarborSettings {
    fn from(row: SettingRow) -> Self {
        HarborSettings {
            harbor_code: row.harbor_code,
            harbor_name: row.harbor_name,
        }
    }
}
