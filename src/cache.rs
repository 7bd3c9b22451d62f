//! Read-through caching and fleet change detection

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    database::ShipStore,
    errors::HarborError,
    models::{FleetShip, IngestionWrite},
};

/// Cached ship list queries
pub const SHIP_LIST: &str = "ship_list";
/// Fleet-wide `MAX(ships.updated_at)`
pub const SHIP_LAST_UPDATE: &str = "ship_last_update";
/// Check-in / check-out statistics
pub const SHIP_STATISTIC: &str = "ship_statistic";
/// Fleet size
pub const SHIP_COUNT: &str = "ship_count";
/// Harbor polygon vertices
pub const APP_POLYGON: &str = "app_polygon";
/// Harbor settings
pub const APP_INFO: &str = "app_info";

struct Entry {
    generation: u64,
    expires_at: Instant,
    value: serde_json::Value,
}

#[derive(Default)]
struct Inner {
    generations: HashMap<String, u64>,
    entries: HashMap<(String, String), Entry>,
}

/// Namespaced TTL cache.
///
/// Every namespace carries a generation counter. Invalidating a namespace
/// bumps its counter, which makes all values cached under the previous
/// generation ineligible even if a reader raced the invalidation and
/// stored them afterwards.
pub struct NamespaceCache {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl NamespaceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current generation of a namespace
    pub async fn generation(&self, namespace: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.generations.get(namespace).copied().unwrap_or(0)
    }

    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let inner = self.inner.read().await;
        let generation = inner.generations.get(namespace).copied().unwrap_or(0);
        let entry = inner
            .entries
            .get(&(namespace.to_string(), key.to_string()))?;

        if entry.generation != generation || entry.expires_at <= Instant::now() {
            return None;
        }

        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {namespace}/{key}: {e}");
                None
            }
        }
    }

    /// Store a value computed under `generation`.
    ///
    /// Returns false when the namespace was invalidated in between, in which
    /// case nothing is stored.
    pub async fn set_if_current<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        generation: u64,
        value: &T,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Error serializing data for cache {namespace}/{key}: {e}");
                return false;
            }
        };

        let mut inner = self.inner.write().await;
        let current = inner.generations.get(namespace).copied().unwrap_or(0);
        if current != generation {
            debug!("Skipping stale cache write {namespace}/{key}");
            return false;
        }

        inner.entries.insert(
            (namespace.to_string(), key.to_string()),
            Entry {
                generation,
                expires_at: Instant::now() + self.ttl,
                value,
            },
        );
        true
    }

    pub async fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> bool {
        let generation = self.generation(namespace).await;
        self.set_if_current(namespace, key, generation, value).await
    }

    /// Make every cached value in the namespace ineligible.
    pub async fn invalidate(&self, namespace: &str) {
        let mut inner = self.inner.write().await;
        *inner.generations.entry(namespace.to_string()).or_insert(0) += 1;
        inner.entries.retain(|(ns, _), _| ns != namespace);
        debug!("Invalidated cache namespace {namespace}");
    }

    /// Read-through helper: return the cached value or load, cache and return it.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        load: F,
    ) -> Result<T, HarborError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, HarborError>>,
    {
        if let Some(value) = self.get(namespace, key).await {
            return Ok(value);
        }

        let generation = self.generation(namespace).await;
        let value = load().await?;
        self.set_if_current(namespace, key, generation, &value).await;
        Ok(value)
    }
}

/// Invalidation contract for a committed ingestion: ship writes make cached
/// ship lists and the last-update marker ineligible, docked log writes make
/// cached statistics ineligible.
pub async fn invalidate_after_ingestion(cache: &NamespaceCache, write: &IngestionWrite) {
    debug!("Ship {} written, invalidating ship caches", write.ship_id);
    cache.invalidate(SHIP_LIST).await;
    cache.invalidate(SHIP_LAST_UPDATE).await;
    if write.docked_log.is_some() {
        cache.invalidate(SHIP_STATISTIC).await;
    }
}

fn moved(
    previous: Option<DateTime<Utc>>,
    current: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (previous, current) {
        (Some(previous), Some(newest)) if previous != newest => Some(newest),
        _ => None,
    }
}

/// Ships updated around the newest fleet modification
#[derive(Debug, Clone, PartialEq)]
pub struct FleetDelta {
    pub observed: DateTime<Utc>,
    pub ships: Vec<FleetShip>,
}

/// Tracks `MAX(ships.updated_at)` so broadcast loops can skip rescans when
/// nothing moved and narrow to the recently changed ships when something did.
pub struct ChangeDetectionCache {
    cache: std::sync::Arc<NamespaceCache>,
    window: Duration,
}

impl ChangeDetectionCache {
    pub fn new(cache: std::sync::Arc<NamespaceCache>, window: Duration) -> Self {
        Self { cache, window }
    }

    /// Newest `updated_at` across all ships, cached until a ship write or TTL.
    pub async fn last_updated(
        &self,
        store: &dyn ShipStore,
    ) -> Result<Option<DateTime<Utc>>, HarborError> {
        self.cache
            .get_or_load(SHIP_LAST_UPDATE, "max", || store.max_ship_updated_at())
            .await
    }

    /// Inclusive window considered "recently changed" around `max`.
    pub fn recent_window(&self, max: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        (max - window, max + window)
    }

    /// The newest `updated_at`, if it differs from `previous`.
    ///
    /// A consumer that has not observed anything yet never sees a change.
    pub async fn has_changed(
        &self,
        store: &dyn ShipStore,
        previous: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, HarborError> {
        let current = self.last_updated(store).await?;
        Ok(moved(previous, current))
    }

    /// Compare against the value a consumer saw last time.
    ///
    /// Returns the value to remember plus the delta, if there is one. The
    /// first observation never produces a delta.
    pub async fn changes_since(
        &self,
        store: &dyn ShipStore,
        previous: Option<DateTime<Utc>>,
    ) -> Result<(Option<DateTime<Utc>>, Option<FleetDelta>), HarborError> {
        let current = self.last_updated(store).await?;
        let Some(newest) = moved(previous, current) else {
            return Ok((current, None));
        };

        let (from, to) = self.recent_window(newest);
        let ships = store.ships_updated_between(from, to).await?;
        debug!(
            "Fleet changed since {:?}, {} ships updated in window",
            previous,
            ships.len()
        );

        Ok((
            current,
            Some(FleetDelta {
                observed: newest,
                ships,
            }),
        ))
    }

    /// Number of paired ships, cached for the TTL unless invalidated.
    pub async fn fleet_size(&self, store: &dyn ShipStore) -> Result<u64, HarborError> {
        self.cache
            .get_or_load(SHIP_COUNT, "all", || store.count_ships())
            .await
    }

    /// Force the next `fleet_size` call to hit the store.
    pub async fn invalidate_fleet_size(&self) {
        self.cache.invalidate(SHIP_COUNT).await;
    }
}
