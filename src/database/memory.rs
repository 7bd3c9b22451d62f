// src/database/memory.rs
//! In-memory store used by unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    cache::{invalidate_after_ingestion, NamespaceCache},
    database::ShipStore,
    errors::HarborError,
    models::{
        FleetShip, HarborSettings, IngestionWrite, LogPage, Ship, ShipDockedLog, ShipId,
        ShipLocationLog, WaterFix,
    },
};

#[derive(Default)]
struct State {
    ships: Vec<Ship>,
    docked_logs: Vec<ShipDockedLog>,
    location_logs: Vec<ShipLocationLog>,
    polygon: Vec<(String, String)>,
    batch_calls: Vec<(u64, u64)>,
}

pub(crate) struct MemoryStore {
    state: Mutex<State>,
    clock: Mutex<DateTime<Utc>>,
    cache: Option<Arc<NamespaceCache>>,
    fail_writes: AtomicBool,
    fail_batches: AtomicUsize,
    fail_count: AtomicBool,
    count_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            cache: None,
            fail_writes: AtomicBool::new(false),
            fail_batches: AtomicUsize::new(0),
            fail_count: AtomicBool::new(false),
            count_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_cache(cache: Arc<NamespaceCache>) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new()
        }
    }

    pub fn insert_ship(&self, ship: Ship) {
        self.state.lock().unwrap().ships.push(ship);
    }

    pub fn set_polygon(&self, vertices: &[(&str, &str)]) {
        self.state.lock().unwrap().polygon = vertices
            .iter()
            .map(|(lat, long)| (lat.to_string(), long.to_string()))
            .collect();
    }

    pub fn push_docked_log(&self, log: ShipDockedLog) {
        self.state.lock().unwrap().docked_logs.push(log);
    }

    pub fn push_location_log(&self, log: ShipLocationLog) {
        self.state.lock().unwrap().location_logs.push(log);
    }

    pub fn set_clock(&self, now: DateTime<Utc>) {
        *self.clock.lock().unwrap() = now;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` batch fetches fail
    pub fn fail_next_batches(&self, n: usize) {
        self.fail_batches.store(n, Ordering::SeqCst);
    }

    pub fn fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn ship(&self, ship_id: ShipId) -> Ship {
        self.state
            .lock()
            .unwrap()
            .ships
            .iter()
            .find(|s| s.id == ship_id)
            .cloned()
            .expect("ship exists")
    }

    pub fn docked_logs_for(&self, ship_id: ShipId) -> Vec<ShipDockedLog> {
        self.state
            .lock()
            .unwrap()
            .docked_logs
            .iter()
            .filter(|l| l.ship_id == ship_id)
            .cloned()
            .collect()
    }

    pub fn location_logs_for(&self, ship_id: ShipId) -> Vec<ShipLocationLog> {
        self.state
            .lock()
            .unwrap()
            .location_logs
            .iter()
            .filter(|l| l.ship_id == ship_id)
            .cloned()
            .collect()
    }

    pub fn batch_calls(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().batch_calls.clone()
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        let now = *clock;
        *clock = now + chrono::Duration::seconds(1);
        now
    }

    fn with_water_fix(state: &State, ship: &Ship) -> FleetShip {
        let water_fix = state
            .location_logs
            .iter()
            .filter(|l| l.ship_id == ship.id && l.on_ground == 0)
            .max_by_key(|l| (l.created_at, l.id))
            .map(|l| WaterFix {
                lat: l.lat.clone(),
                long: l.long.clone(),
                on_ground: l.on_ground,
                created_at: l.created_at,
            });

        FleetShip {
            ship: ship.clone(),
            water_fix,
        }
    }
}

fn storage_error() -> HarborError {
    HarborError::DatabaseError(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ShipStore for MemoryStore {
    async fn ship_by_device(&self, device_id: &str) -> Result<Ship, HarborError> {
        self.state
            .lock()
            .unwrap()
            .ships
            .iter()
            .find(|s| s.device_id == device_id)
            .cloned()
            .ok_or_else(|| HarborError::NotFound(format!("no ship paired with device {device_id}")))
    }

    async fn last_docked_log(&self, ship_id: ShipId) -> Result<Option<ShipDockedLog>, HarborError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .docked_logs
            .iter()
            .filter(|l| l.ship_id == ship_id)
            .max_by_key(|l| (l.created_at, l.id))
            .cloned())
    }

    async fn record_ingestion(&self, write: IngestionWrite) -> Result<(), HarborError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(storage_error());
        }

        let now = self.tick();
        {
            let mut state = self.state.lock().unwrap();
            let ship = state
                .ships
                .iter_mut()
                .find(|s| s.id == write.ship_id)
                .ok_or_else(|| HarborError::NotFound(format!("ship {}", write.ship_id)))?;
            ship.status = write.status;
            ship.current_lat = write.lat.clone();
            ship.current_long = write.long.clone();
            ship.on_ground = write.on_ground;
            ship.updated_at = now;

            if let Some(status) = write.docked_log {
                let id = state.docked_logs.len() as i64 + 1;
                state.docked_logs.push(ShipDockedLog {
                    id,
                    ship_id: write.ship_id,
                    lat: write.lat.clone(),
                    long: write.long.clone(),
                    status,
                    is_inspected: 0,
                    is_reported: 0,
                    created_at: now,
                });
            }

            let id = state.location_logs.len() as i64 + 1;
            state.location_logs.push(ShipLocationLog {
                id,
                ship_id: write.ship_id,
                lat: write.lat.clone(),
                long: write.long.clone(),
                is_mocked: write.is_mocked,
                on_ground: write.on_ground,
                created_at: now,
            });
        }

        if let Some(cache) = &self.cache {
            invalidate_after_ingestion(cache, &write).await;
        }
        Ok(())
    }

    async fn harbor_polygon(&self) -> Result<Vec<(String, String)>, HarborError> {
        Ok(self.state.lock().unwrap().polygon.clone())
    }

    async fn harbor_settings(&self) -> Result<HarborSettings, HarborError> {
        Ok(HarborSettings {
            harbor_code: 1,
            harbor_name: "Sunda Kelapa".to_string(),
        })
    }

    async fn count_ships(&self) -> Result<u64, HarborError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(storage_error());
        }
        Ok(self.state.lock().unwrap().ships.len() as u64)
    }

    async fn max_ship_updated_at(&self) -> Result<Option<DateTime<Utc>>, HarborError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ships
            .iter()
            .map(|s| s.updated_at)
            .max())
    }

    async fn fleet_batch(&self, offset: u64, limit: u64) -> Result<Vec<FleetShip>, HarborError> {
        let mut state = self.state.lock().unwrap();
        state.batch_calls.push((offset, limit));

        if self.fail_batches.load(Ordering::SeqCst) > 0 {
            self.fail_batches.fetch_sub(1, Ordering::SeqCst);
            return Err(storage_error());
        }

        let mut ships: Vec<&Ship> = state.ships.iter().collect();
        ships.sort_by_key(|s| (s.created_at, s.id));
        Ok(ships
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|s| Self::with_water_fix(&state, s))
            .collect())
    }

    async fn ships_updated_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FleetShip>, HarborError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ships
            .iter()
            .filter(|s| s.updated_at >= from && s.updated_at <= to)
            .map(|s| Self::with_water_fix(&state, s))
            .collect())
    }

    async fn docked_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipDockedLog>, HarborError> {
        let mut logs = self.docked_logs_for(ship_id);
        logs.sort_by_key(|l| std::cmp::Reverse((l.created_at, l.id)));
        Ok(logs
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn location_logs(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipLocationLog>, HarborError> {
        let mut logs = self.location_logs_for(ship_id);
        logs.sort_by_key(|l| std::cmp::Reverse((l.created_at, l.id)));
        Ok(logs
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }
}
