//! Harbor monitor service

use std::sync::Arc;

use harbor_monitor::{
    broadcast::{LiveBroadcastLoop, RelayViewer},
    cache::{ChangeDetectionCache, NamespaceCache},
    config::AppConfig,
    database::{Database, ShipStore},
    directory::ShipDirectory,
    errors::HarborError,
    http::{router, AppState},
    ingest::LocationIngestService,
    notification,
    water::HttpWaterClient,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), HarborError> {
    #[cfg(feature = "dotenvy")]
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {e}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    let cache = Arc::new(NamespaceCache::new(config.cache.ttl));
    let store: Arc<dyn ShipStore> =
        Arc::new(Database::connect(&config.database, cache.clone()).await?);
    let changes = Arc::new(ChangeDetectionCache::new(
        cache,
        config.cache.change_window,
    ));

    let ingest = LocationIngestService::new(
        store.clone(),
        Arc::new(HttpWaterClient::new(&config.water)?),
        Arc::from(notification::from_config(&config.notification)?),
    );

    let shutdown = CancellationToken::new();

    if let Some(url) = config.broadcast.relay_url.clone() {
        let store = store.clone();
        let changes = changes.clone();
        let broadcast = config.broadcast.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            match RelayViewer::connect(&url).await {
                Ok(viewer) => {
                    let exit = LiveBroadcastLoop::new(store, changes, broadcast, viewer, cancel)
                        .run()
                        .await;
                    info!("Relay broadcast ended: {:?}", exit);
                }
                Err(e) => error!("Relay broadcast not started: {}", e),
            }
        });
    }

    let app = router(AppState {
        ingest,
        directory: ShipDirectory::new(store.clone()),
        store,
        changes,
        broadcast: config.broadcast.clone(),
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(config.server.bind).await?;
    info!("Listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
