//! Water / land classification client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{config::WaterConfig, errors::HarborError, geofence::Coordinate};

/// Decides whether a coordinate lies on water
#[async_trait]
pub trait WaterDetection: Send + Sync {
    async fn is_water(&self, point: Coordinate) -> Result<bool, HarborError>;
}

#[derive(Debug, Deserialize)]
struct CoordinateResponse {
    #[allow(dead_code)]
    status: i32,
    #[allow(dead_code)]
    message: String,
    data: Vec<CoordinateData>,
}

#[derive(Debug, Deserialize)]
struct CoordinateData {
    #[allow(dead_code)]
    coordinate: Vec<f64>,
    is_water: bool,
}

/// Client for the classifier service at `{url}/ceklaut`.
///
/// The service takes a JSON `[lat, long]` body and answers with one
/// classification per coordinate.
pub struct HttpWaterClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpWaterClient {
    pub fn new(config: &WaterConfig) -> Result<Self, HarborError> {
        config.validate()?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/ceklaut", config.url.trim_end_matches('/')),
            timeout: config.timeout,
        })
    }

    fn interpret(status: StatusCode, body: &[u8]) -> Result<bool, HarborError> {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(HarborError::RateLimited);
        }
        if !status.is_success() {
            return Err(HarborError::Upstream {
                status: status.as_u16(),
            });
        }

        let response: CoordinateResponse = serde_json::from_slice(body)?;
        response
            .data
            .first()
            .map(|d| d.is_water)
            .ok_or_else(|| HarborError::Classifier("empty classification result".to_string()))
    }
}

#[async_trait]
impl WaterDetection for HttpWaterClient {
    async fn is_water(&self, point: Coordinate) -> Result<bool, HarborError> {
        let request = async {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&[point.lat, point.long])
                .send()
                .await?;
            let status = response.status();
            let body = response.bytes().await?;
            Self::interpret(status, &body)
        };

        let is_water = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                warn!("Water classifier did not answer within {:?}", self.timeout);
                HarborError::ClassifierTimeout
            })??;

        debug!(
            "Classified ({}, {}) as {}",
            point.lat,
            point.long,
            if is_water { "water" } else { "land" }
        );
        Ok(is_water)
    }
}
