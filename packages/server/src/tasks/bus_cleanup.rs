use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::BusConfig;
use palaver_surrealdb::repository::SyncBusRepository;

/// Background task keeping the bus table bounded: every cleanup interval,
/// delete events older than the retention window.
pub fn start_bus_cleanup_task(
    bus: SyncBusRepository,
    config: BusConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.cleanup_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    match bus.purge_older_than(config.retention).await {
                        Ok(()) => debug!("purged expired bus events"),
                        Err(e) => error!(error = %e, "bus event cleanup failed"),
                    }
                },
            }
        }
    })
}
