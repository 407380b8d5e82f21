use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Counters for every explicit drop policy in the engine. Injected through
/// app state rather than held in globals.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Frames dropped because one session's outbound queue was full.
    pub outbound_frames_dropped: IntCounter,
    /// Sessions disconnected after three consecutive drops.
    pub slow_sessions_disconnected: IntCounter,
    /// Broadcasts dropped because a room's inbox was full.
    pub room_broadcasts_dropped: IntCounter,
    /// Message batches dropped after exhausting retries.
    pub message_batches_dropped: IntCounter,
    /// Bus events dropped at dispatch because the target room inbox was full.
    pub bus_dispatches_dropped: IntCounter,
    /// Reconnect attempts of the bus subscriber.
    pub bus_reconnects: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let outbound_frames_dropped = IntCounter::new(
            "palaver_outbound_frames_dropped_total",
            "Frames dropped because a session outbound queue was full",
        )?;
        let slow_sessions_disconnected = IntCounter::new(
            "palaver_slow_sessions_disconnected_total",
            "Sessions disconnected after three consecutive dropped frames",
        )?;
        let room_broadcasts_dropped = IntCounter::new(
            "palaver_room_broadcasts_dropped_total",
            "Broadcasts dropped because a room inbox was full",
        )?;
        let message_batches_dropped = IntCounter::new(
            "palaver_message_batches_dropped_total",
            "Message batches dropped after exhausting writer retries",
        )?;
        let bus_dispatches_dropped = IntCounter::new(
            "palaver_bus_dispatches_dropped_total",
            "Bus events dropped because the target room inbox was full",
        )?;
        let bus_reconnects = IntCounter::new(
            "palaver_bus_reconnects_total",
            "Reconnect attempts of the sync bus subscriber",
        )?;

        registry.register(Box::new(outbound_frames_dropped.clone()))?;
        registry.register(Box::new(slow_sessions_disconnected.clone()))?;
        registry.register(Box::new(room_broadcasts_dropped.clone()))?;
        registry.register(Box::new(message_batches_dropped.clone()))?;
        registry.register(Box::new(bus_dispatches_dropped.clone()))?;
        registry.register(Box::new(bus_reconnects.clone()))?;

        Ok(Self {
            registry,
            outbound_frames_dropped,
            slow_sessions_disconnected,
            room_broadcasts_dropped,
            message_batches_dropped,
            bus_dispatches_dropped,
            bus_reconnects,
        })
    }

    /// Text exposition for the /metrics endpoint.
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
