// src/database.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::{debug, error, info};

use crate::{
    cache::{invalidate_after_ingestion, NamespaceCache, APP_INFO, APP_POLYGON},
    config::DatabaseConfig,
    errors::HarborError,
    models::{
        DockStatus, FleetShip, HarborSettings, IngestionWrite, LogPage, Ship, ShipDockedLog,
        ShipId, ShipLocationLog,
    },
};

pub(crate) mod models;

#[cfg(test)]
pub(crate) mod memory;

use models::{DockedLogRow, FleetShipRow, GeofenceRow, LocationLogRow, SettingRow, ShipRow};

/// Persistence operations the ingestion path and the broadcast loops rely on
#[async_trait]
pub trait ShipStore: Send + Sync {
    /// Look up a ship by the device it was paired with
    async fn ship_by_device(&self, device_id: &str) -> Result<Ship, HarborError>;

    /// Newest docked log of a ship, if any
    async fn last_docked_log(&self, ship_id: ShipId) -> Result<Option<ShipDockedLog>, HarborError>;

    /// Apply docked log, location log and ship update of one report atomically
    async fn record_ingestion(&self, write: IngestionWrite) -> Result<(), HarborError>;

    /// Harbor polygon vertices as stored `(lat, long)` pairs, in stored order
    async fn harbor_polygon(&self) -> Result<Vec<(String, String)>, HarborError>;

    async fn harbor_settings(&self) -> Result<HarborSettings, HarborError>;

    async fn count_ships(&self) -> Result<u64, HarborError>;

    /// `MAX(ships.updated_at)`, `None` when no ship exists
    async fn max_ship_updated_at(&self) -> Result<Option<DateTime<Utc>>, HarborError>;

    /// Ships `[offset, offset + limit)` in pairing order, with their latest water fix
    async fn fleet_batch(&self, offset: u64, limit: u64) -> Result<Vec<FleetShip>, HarborError>;

    /// Ships whose `updated_at` lies within `[from, to]`, with their latest water fix
    async fn ships_updated_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FleetShip>, HarborError>;

    async fn docked_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipDockedLog>, HarborError>;

    async fn location_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipLocationLog>, HarborError>;
}

const SHIP_COLUMNS: &str = "s.id, s.name, s.device_id, s.status, s.current_lat, s.current_long, \
     s.on_ground, s.firebase_token, s.created_at, s.updated_at";

const WATER_FIX_JOIN: &str = "LEFT JOIN LATERAL (
        SELECT l.lat, l.long, l.on_ground, l.created_at
        FROM ship_location_logs l
        WHERE l.ship_id = s.id AND l.on_ground = 0
        ORDER BY l.created_at DESC, l.id DESC
        LIMIT 1
    ) w ON TRUE";

/// Postgres-backed store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    cache: Arc<NamespaceCache>,
}

impl Database {
    /// Wrap an existing pool and bring the schema up to date
    pub async fn new(pool: PgPool, cache: Arc<NamespaceCache>) -> Result<Self, HarborError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| HarborError::MigrationError(e.to_string()))?;

        Ok(Self { pool, cache })
    }

    /// Connect using the configured URL
    pub async fn connect(
        config: &DatabaseConfig,
        cache: Arc<NamespaceCache>,
    ) -> Result<Self, HarborError> {
        config.validate()?;
        info!(
            "Connecting to database, max_connections={}",
            config.max_connections
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!("Failed to connect to database: {}", e);
                HarborError::DatabaseConnectionError(e.to_string())
            })?;

        Self::new(pool, cache).await
    }

    async fn insert_docked_log(
        tx: &mut Transaction<'_, Postgres>,
        write: &IngestionWrite,
        status: DockStatus,
    ) -> Result<(), HarborError> {
        sqlx::query(
            "INSERT INTO ship_docked_logs (ship_id, lat, long, status, is_inspected, is_reported)
             VALUES ($1, $2, $3, $4, 0, 0)",
        )
        .bind(write.ship_id.value())
        .bind(&write.lat)
        .bind(&write.long)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_location_log(
        tx: &mut Transaction<'_, Postgres>,
        write: &IngestionWrite,
    ) -> Result<(), HarborError> {
        sqlx::query(
            "INSERT INTO ship_location_logs (ship_id, lat, long, is_mocked, on_ground)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(write.ship_id.value())
        .bind(&write.lat)
        .bind(&write.long)
        .bind(write.is_mocked)
        .bind(write.on_ground)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn update_ship(
        tx: &mut Transaction<'_, Postgres>,
        write: &IngestionWrite,
    ) -> Result<(), HarborError> {
        let result = sqlx::query(
            "UPDATE ships
             SET status = $2, current_lat = $3, current_long = $4, on_ground = $5,
                 updated_at = clock_timestamp()
             WHERE id = $1",
        )
        .bind(write.ship_id.value())
        .bind(write.status.as_str())
        .bind(&write.lat)
        .bind(&write.long)
        .bind(if write.on_ground == 1 { 1i16 } else { 0i16 })
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HarborError::NotFound(format!("ship {}", write.ship_id)));
        }

        Ok(())
    }
}

#[async_trait]
impl ShipStore for Database {
    async fn ship_by_device(&self, device_id: &str) -> Result<Ship, HarborError> {
        let sql = format!("SELECT {SHIP_COLUMNS} FROM ships s WHERE s.device_id = $1");
        let row: Option<ShipRow> = sqlx::query_as(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| HarborError::NotFound(format!("no ship paired with device {device_id}")))?
            .try_into()
    }

    async fn last_docked_log(&self, ship_id: ShipId) -> Result<Option<ShipDockedLog>, HarborError> {
        let row: Option<DockedLogRow> = sqlx::query_as(
            "SELECT id, ship_id, lat, long, status, is_inspected, is_reported, created_at
             FROM ship_docked_logs
             WHERE ship_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(ship_id.value())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShipDockedLog::try_from).transpose()
    }

    async fn record_ingestion(&self, write: IngestionWrite) -> Result<(), HarborError> {
        let mut tx = self.pool.begin().await?;

        if let Some(status) = write.docked_log {
            Self::insert_docked_log(&mut tx, &write, status).await?;
        }
        Self::insert_location_log(&mut tx, &write).await?;
        Self::update_ship(&mut tx, &write).await?;

        tx.commit().await?;
        debug!(
            "Recorded report for ship {}: status={}, on_ground={}",
            write.ship_id, write.status, write.on_ground
        );

        invalidate_after_ingestion(&self.cache, &write).await;

        Ok(())
    }

    async fn harbor_polygon(&self) -> Result<Vec<(String, String)>, HarborError> {
        self.cache
            .get_or_load(APP_POLYGON, "all", || async {
                let rows: Vec<GeofenceRow> =
                    sqlx::query_as("SELECT lat, long FROM app_geofences ORDER BY id ASC")
                        .fetch_all(&self.pool)
                        .await?;
                Ok::<_, HarborError>(rows.into_iter().map(|r| (r.lat, r.long)).collect())
            })
            .await
    }

    async fn harbor_settings(&self) -> Result<HarborSettings, HarborError> {
        self.cache
            .get_or_load(APP_INFO, "current", || async {
                let row: Option<SettingRow> = sqlx::query_as(
                    "SELECT harbor_code, harbor_name FROM app_setting ORDER BY id DESC LIMIT 1",
                )
                .fetch_optional(&self.pool)
                .await?;
                row.map(HarborSettings::from)
                    .ok_or_else(|| HarborError::NotFound("harbor settings".to_string()))
            })
            .await
    }

    async fn count_ships(&self) -> Result<u64, HarborError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ships")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn max_ship_updated_at(&self) -> Result<Option<DateTime<Utc>>, HarborError> {
        let max: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MAX(updated_at) FROM ships")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn fleet_batch(&self, offset: u64, limit: u64) -> Result<Vec<FleetShip>, HarborError> {
        let sql = format!(
            "SELECT {SHIP_COLUMNS},
                    w.lat AS log_lat, w.long AS log_long,
                    w.on_ground AS log_on_ground, w.created_at AS log_created
             FROM ships s
             {WATER_FIX_JOIN}
             ORDER BY s.created_at ASC, s.id ASC
             OFFSET $1 LIMIT $2"
        );
        let rows: Vec<FleetShipRow> = sqlx::query_as(&sql)
            .bind(offset as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(FleetShip::try_from).collect()
    }

    async fn ships_updated_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FleetShip>, HarborError> {
        let sql = format!(
            "SELECT {SHIP_COLUMNS},
                    w.lat AS log_lat, w.long AS log_long,
                    w.on_ground AS log_on_ground, w.created_at AS log_created
             FROM ships s
             {WATER_FIX_JOIN}
             WHERE s.updated_at BETWEEN $1 AND $2
             ORDER BY s.created_at DESC, s.id DESC"
        );
        let rows: Vec<FleetShipRow> = sqlx::query_as(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(FleetShip::try_from).collect()
    }

    async fn docked_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipDockedLog>, HarborError> {
        let rows: Vec<DockedLogRow> = sqlx::query_as(
            "SELECT id, ship_id, lat, long, status, is_inspected, is_reported, created_at
             FROM ship_docked_logs
             WHERE ship_id = $1
             ORDER BY created_at DESC, id DESC
             OFFSET $2 LIMIT $3",
        )
        .bind(ship_id.value())
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ShipDockedLog::try_from).collect()
    }

    async fn location_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipLocationLog>, HarborError> {
        let rows: Vec<LocationLogRow> = sqlx::query_as(
            "SELECT id, ship_id, lat, long, is_mocked, on_ground, created_at
             FROM ship_location_logs
             WHERE ship_id = $1
             ORDER BY created_at DESC, id DESC
             OFFSET $2 LIMIT $3",
        )
        .bind(ship_id.value())
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ShipLocationLog::from).collect())
    }
}
