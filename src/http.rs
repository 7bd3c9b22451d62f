//! HTTP surface: report ingestion, ship history, dashboard stream and health probe

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broadcast::{LiveBroadcastLoop, WsViewer},
    cache::ChangeDetectionCache,
    config::BroadcastConfig,
    database::ShipStore,
    directory::ShipDirectory,
    errors::HarborError,
    ingest::LocationIngestService,
    models::{LocationReport, LogPage, ShipId},
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ingest: LocationIngestService,
    pub directory: ShipDirectory,
    pub store: Arc<dyn ShipStore>,
    pub changes: Arc<ChangeDetectionCache>,
    pub broadcast: BroadcastConfig,
    /// Parent of every viewer loop's token
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
struct Meta {
    message: String,
    code: u16,
    status: &'static str,
}

/// `{meta: {message, code, status}, data}`
#[derive(Debug, Serialize)]
struct Envelope {
    meta: Meta,
    data: Value,
}

fn envelope(code: StatusCode, message: impl Into<String>, data: Value) -> Response {
    let body = Envelope {
        meta: Meta {
            message: message.into(),
            code: code.as_u16(),
            status: if code.is_success() { "success" } else { "error" },
        },
        data,
    };
    (code, Json(body)).into_response()
}

impl IntoResponse for HarborError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        envelope(code, self.to_string(), Value::Null)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ship/record", post(record_location))
        .route("/api/v1/ship/{id}/docked-logs", get(docked_logs_by_id))
        .route("/api/v1/ship/{id}/location-logs", get(location_logs_by_id))
        .route(
            "/api/v1/ship/device/{device_id}/docked-logs",
            get(docked_logs_by_device),
        )
        .route(
            "/api/v1/ship/device/{device_id}/location-logs",
            get(location_logs_by_device),
        )
        .route("/api/v1/dashboard/ws", get(dashboard_stream))
        .with_state(state)
}

async fn health() -> Response {
    envelope(StatusCode::OK, "ok", Value::Null)
}

fn rejected(message: String) -> HarborError {
    HarborError::Validation(message)
}

async fn record_location(
    State(state): State<AppState>,
    report: Result<Json<LocationReport>, JsonRejection>,
) -> Result<Response, HarborError> {
    let Json(report) = report.map_err(|e| rejected(e.body_text()))?;
    state.ingest.record(report).await?;
    Ok(envelope(StatusCode::OK, "Ship location recorded", Value::Null))
}

fn history<T: Serialize>(logs: Vec<T>) -> Result<Response, HarborError> {
    let data = serde_json::to_value(logs)?;
    Ok(envelope(StatusCode::OK, "Ship history", data))
}

async fn docked_logs_by_id(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    page: Result<Query<LogPage>, QueryRejection>,
) -> Result<Response, HarborError> {
    let Path(id) = id.map_err(|e| rejected(e.body_text()))?;
    let Query(page) = page.map_err(|e| rejected(e.body_text()))?;
    history(state.directory.dock_logs_by_ship_id(ShipId(id), page).await?)
}

async fn location_logs_by_id(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    page: Result<Query<LogPage>, QueryRejection>,
) -> Result<Response, HarborError> {
    let Path(id) = id.map_err(|e| rejected(e.body_text()))?;
    let Query(page) = page.map_err(|e| rejected(e.body_text()))?;
    history(state.directory.location_logs_by_ship_id(ShipId(id), page).await?)
}

async fn docked_logs_by_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    page: Result<Query<LogPage>, QueryRejection>,
) -> Result<Response, HarborError> {
    let Query(page) = page.map_err(|e| rejected(e.body_text()))?;
    history(state.directory.dock_logs_by_device_id(&device_id, page).await?)
}

async fn location_logs_by_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    page: Result<Query<LogPage>, QueryRejection>,
) -> Result<Response, HarborError> {
    let Query(page) = page.map_err(|e| rejected(e.body_text()))?;
    history(
        state
            .directory
            .location_logs_by_device_id(&device_id, page)
            .await?,
    )
}

async fn dashboard_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        info!("Dashboard viewer connected");
        let exit = LiveBroadcastLoop::new(
            state.store.clone(),
            state.changes.clone(),
            state.broadcast.clone(),
            WsViewer::new(socket),
            state.shutdown.child_token(),
        )
        .run()
        .await;
        info!("Dashboard viewer loop ended: {:?}", exit);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NamespaceCache;
    use crate::database::memory::MemoryStore;
    use crate::models::{fixtures, DockStatus, ShipStatus};
    use crate::notification::fake::RecordingGateway;
    use crate::water::fake::ScriptedWater;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn state(water: ScriptedWater) -> AppState {
        let cache = Arc::new(NamespaceCache::new(Duration::from_secs(3600)));
        let store = Arc::new(MemoryStore::with_cache(cache.clone()));
        store.set_polygon(&[
            ("-6.2", "106.7"),
            ("-6.2", "106.9"),
            ("-6.0", "106.9"),
            ("-6.0", "106.7"),
        ]);
        store.insert_ship(fixtures::ship(1, ShipStatus::Checkout, 0));

        AppState {
            ingest: LocationIngestService::new(
                store.clone(),
                Arc::new(water),
                Arc::new(RecordingGateway::new()),
            ),
            directory: ShipDirectory::new(store.clone()),
            store,
            changes: Arc::new(ChangeDetectionCache::new(cache, Duration::from_secs(10))),
            broadcast: BroadcastConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    async fn serve(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr.to_string()
    }

    async fn post_report(addr: &str, body: Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/ship/record"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn report_inside_harbor_is_recorded() {
        let addr = serve(state(ScriptedWater::new())).await;
        let (status, body) = post_report(
            &addr,
            serde_json::json!({
                "device_id": "device-1",
                "lat": "-6.1",
                "long": "106.8",
                "is_mocked": false
            }),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["meta"]["code"], 200);
        assert_eq!(body["meta"]["status"], "success");
    }

    #[tokio::test]
    async fn malformed_latitude_is_bad_request() {
        let addr = serve(state(ScriptedWater::new())).await;
        let (status, body) = post_report(
            &addr,
            serde_json::json!({"device_id": "device-1", "lat": "north", "long": "106.8"}),
        )
        .await;

        assert_eq!(status, 400);
        assert_eq!(body["meta"]["status"], "error");
    }

    #[tokio::test]
    async fn unknown_device_is_bad_request() {
        let addr = serve(state(ScriptedWater::new())).await;
        let (status, _) = post_report(
            &addr,
            serde_json::json!({"device_id": "nobody", "lat": "-6.1", "long": "106.8"}),
        )
        .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn classifier_rate_limit_is_429() {
        let addr = serve(state(ScriptedWater::answering([Err(
            HarborError::RateLimited,
        )])))
        .await;
        let (status, body) = post_report(
            &addr,
            serde_json::json!({"device_id": "device-1", "lat": "-5.0", "long": "106.8"}),
        )
        .await;

        assert_eq!(status, 429);
        assert_eq!(body["meta"]["code"], 429);
    }

    #[tokio::test]
    async fn incomplete_body_is_enveloped_bad_request() {
        let addr = serve(state(ScriptedWater::new())).await;
        let (status, body) =
            post_report(&addr, serde_json::json!({"device_id": "device-1"})).await;

        assert_eq!(status, 400);
        assert_eq!(body["meta"]["code"], 400);
        assert_eq!(body["meta"]["status"], "error");
    }

    #[tokio::test]
    async fn invalid_json_is_enveloped_bad_request() {
        let addr = serve(state(ScriptedWater::new())).await;
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/ship/record"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["meta"]["code"], 400);
    }

    async fn get_json(url: String) -> (u16, Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn recorded_arrival_shows_in_history() {
        let addr = serve(state(ScriptedWater::new())).await;
        let (status, _) = post_report(
            &addr,
            serde_json::json!({"device_id": "device-1", "lat": "-6.1", "long": "106.8"}),
        )
        .await;
        assert_eq!(status, 200);

        let (status, body) = get_json(format!("http://{addr}/api/v1/ship/1/docked-logs")).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"][0]["status"], serde_json::json!(DockStatus::Checkin));

        let (status, body) = get_json(format!(
            "http://{addr}/api/v1/ship/device/device-1/location-logs?limit=1"
        ))
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["lat"], "-6.1");
    }

    #[tokio::test]
    async fn history_rejections_are_enveloped() {
        let addr = serve(state(ScriptedWater::new())).await;

        let (status, body) =
            get_json(format!("http://{addr}/api/v1/ship/1/location-logs?limit=0")).await;
        assert_eq!(status, 400);
        assert_eq!(body["meta"]["code"], 400);

        let (status, body) = get_json(format!("http://{addr}/api/v1/ship/abc/docked-logs")).await;
        assert_eq!(status, 400);
        assert_eq!(body["meta"]["status"], "error");

        let (status, _) =
            get_json(format!("http://{addr}/api/v1/ship/device/ghost/docked-logs")).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let addr = serve(state(ScriptedWater::new())).await;
        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn dashboard_stream_pushes_fleet_frame() {
        let addr = serve(state(ScriptedWater::new())).await;
        let url = format!("ws://{addr}/api/v1/dashboard/ws");
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let frame = loop {
            match ws.next().await.unwrap().unwrap() {
                tokio_tungstenite::tungstenite::Message::Text(text) => break text.to_string(),
                _ => continue,
            }
        };
        let entries: Vec<crate::models::FleetEntry> = serde_json::from_str(&frame).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].device_id, "device-1");
    }
}
