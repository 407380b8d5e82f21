use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use palaver_server::api;
use palaver_server::auth::AuthService;
use palaver_server::cache::RecentMessageCache;
use palaver_server::config::ServerConfig;
use palaver_server::metrics::Metrics;
use palaver_server::persistence::MessageWriter;
use palaver_server::realtime::RoomRegistry;
use palaver_server::state::AppState;
use palaver_server::sync::{BusPublisher, SyncEngine, SyncPublisher};
use palaver_server::tasks::start_bus_cleanup_task;
use palaver_surrealdb::repository::{
    AuthRepository, MembershipRepository, MessageRepository, PresenceRepository,
    SyncBusRepository, UserRepository,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig::init();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let db = surrealdb::engine::any::connect(&config.database_url).await?;
    db.use_ns(&config.database_namespace)
        .use_db(&config.database_name)
        .await?;
    palaver_surrealdb::migrate(&db).await?;
    info!(url = %config.database_url, "database connected");

    let metrics = Arc::new(Metrics::new()?);
    let bus = SyncBusRepository::new(db.clone());
    let publisher: Arc<dyn BusPublisher> = Arc::new(SyncPublisher::new(bus.clone()));

    // One token drives the whole shutdown sequence; every background task
    // hangs off a child of it.
    let shutdown = CancellationToken::new();

    let registry = RoomRegistry::new(
        Arc::clone(&publisher),
        config.realtime.clone(),
        Arc::clone(&metrics),
        shutdown.child_token(),
    );
    let sweeper = registry.spawn_sweeper();

    let recent_cache = RecentMessageCache::new(&config.cache);
    let writer = MessageWriter::spawn(
        MessageRepository::new(db.clone()),
        recent_cache.clone(),
        Arc::clone(&publisher),
        config.writer.clone(),
        Arc::clone(&metrics),
    );

    let engine = SyncEngine::new(
        bus.clone(),
        Arc::clone(&registry),
        Arc::clone(&metrics),
        config.bus.clone(),
        shutdown.child_token(),
    )
    .spawn();

    let cleanup = start_bus_cleanup_task(bus, config.bus.clone(), shutdown.child_token());

    let state = AppState {
        db: db.clone(),
        config,
        registry: Arc::clone(&registry),
        writer: Arc::clone(&writer),
        publisher,
        auth: AuthService::new(AuthRepository::new(db.clone())),
        memberships: MembershipRepository::new(db.clone()),
        messages: MessageRepository::new(db.clone()),
        users: UserRepository::new(db.clone()),
        presence: PresenceRepository::new(db.clone()),
        recent_cache,
        metrics,
    };

    let app = api::router(state);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    // The shutdown signal cancels the token first: rooms close, which closes
    // session queues, which ends write pumps, which closes connections, which
    // ends read pumps. Only then can the server drain its connections.
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        },
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(config.shutdown_deadline).await;
        } => {
            warn!("shutdown deadline exceeded, abandoning open connections");
        },
    }
    shutdown.cancel();

    registry.shutdown_all().await;

    // The pipeline flushes everything it accepted, bounded by the deadline.
    if tokio::time::timeout(config.shutdown_deadline, writer.stop()).await.is_err() {
        warn!("write pipeline flush exceeded shutdown deadline");
    }

    let _ = engine.await;
    let _ = sweeper.await;
    let _ = cleanup.await;

    info!("shutdown complete");
    Ok(())
}
