//! Ship history lookups by ship id or by paired device

use std::sync::Arc;

use crate::{
    database::ShipStore,
    errors::HarborError,
    models::{LogPage, ShipDockedLog, ShipId, ShipLocationLog},
};

/// History queries. Device lookups resolve the ship first and then run the
/// same query as the id variants.
#[derive(Clone)]
pub struct ShipDirectory {
    store: Arc<dyn ShipStore>,
}

impl ShipDirectory {
    pub fn new(store: Arc<dyn ShipStore>) -> Self {
        Self { store }
    }

    pub async fn dock_logs_by_ship_id(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipDockedLog>, HarborError> {
        validate_page(page)?;
        self.store.docked_logs(ship_id, page).await
    }

    pub async fn dock_logs_by_device_id(
        &self,
        device_id: &str,
        page: LogPage,
    ) -> Result<Vec<ShipDockedLog>, HarborError> {
        let ship_id = self.resolve(device_id).await?;
        self.dock_logs_by_ship_id(ship_id, page).await
    }

    pub async fn location_logs_by_ship_id(
        &self,
        ship_id: ShipId,
        page: LogPage,
    ) -> Result<Vec<ShipLocationLog>, HarborError> {
        validate_page(page)?;
        self.store.location_logs(ship_id, page).await
    }

    pub async fn location_logs_by_device_id(
        &self,
        device_id: &str,
        page: LogPage,
    ) -> Result<Vec<ShipLocationLog>, HarborError> {
        let ship_id = self.resolve(device_id).await?;
        self.location_logs_by_ship_id(ship_id, page).await
    }

    async fn resolve(&self, device_id: &str) -> Result<ShipId, HarborError> {
        Ok(self.store.ship_by_device(device_id).await?.id)
    }
}

fn validate_page(page: LogPage) -> Result<(), HarborError> {
    if page.offset < 0 || page.limit <= 0 {
        return Err(HarborError::Validation(format!(
            "invalid page offset={} limit={}",
            page.offset, page.limit
        )));
    }
    Ok(())
}
