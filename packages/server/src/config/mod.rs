use std::env;
use std::sync::OnceLock;
use std::time::Duration;

static SERVER_CONFIG: OnceLock<ServerConfig> = OnceLock::new();

/// Knobs for the realtime surface: connection pumps, rooms and eviction.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Capacity of each session's outbound frame queue.
    pub session_outbound_capacity: usize,
    /// Capacity of each room's broadcast inbox.
    pub room_broadcast_capacity: usize,
    /// Read deadline; reset on every pong.
    pub pong_wait: Duration,
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Maximum inbound frame size in bytes, enforced at the upgrade.
    pub max_frame_size: usize,
    /// Sweeper period for cold-room eviction.
    pub evict_interval: Duration,
    /// A room must be empty AND idle this long before eviction.
    pub inactivity_threshold: Duration,
    /// One-shot eviction probe delay after a room becomes empty.
    pub empty_room_grace: Duration,
    /// Typing entries older than this are expired by the room tick.
    pub typing_expiry: Duration,
    /// Period of the room tick that sweeps the typing tracker.
    pub typing_sweep_interval: Duration,
}

impl RealtimeConfig {
    /// Transport pings are sent at 9/10 of the pong wait, so a healthy client
    /// always refreshes the read deadline in time.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    pub fn from_env() -> Self {
        Self {
            session_outbound_capacity: env_usize("SESSION_OUTBOUND_CAPACITY", 256),
            room_broadcast_capacity: env_usize("ROOM_BROADCAST_CAPACITY", 256),
            pong_wait: env_secs("PONG_WAIT_SECS", 60),
            write_wait: env_secs("WRITE_WAIT_SECS", 10),
            max_frame_size: env_usize("MAX_FRAME_SIZE", 512),
            evict_interval: env_secs("EVICT_INTERVAL_SECS", 60),
            inactivity_threshold: env_secs("INACTIVITY_THRESHOLD_SECS", 600),
            empty_room_grace: env_secs("EMPTY_ROOM_GRACE_SECS", 60),
            typing_expiry: env_secs("TYPING_EXPIRY_SECS", 3),
            typing_sweep_interval: env_secs("TYPING_SWEEP_INTERVAL_SECS", 5),
        }
    }
}

/// Knobs for the batched durable-write pipeline.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub queue_capacity: usize,
    /// How long a full enqueue blocks before failing fast.
    pub enqueue_wait: Duration,
}

impl WriterConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_usize("WRITER_BATCH_SIZE", 50).max(1),
            flush_interval: env_millis("WRITER_FLUSH_INTERVAL_MS", 100),
            max_retries: env_u32("WRITER_MAX_RETRIES", 5).max(1),
            initial_backoff: env_millis("WRITER_INITIAL_BACKOFF_MS", 100),
            queue_capacity: env_usize("WRITER_QUEUE_CAPACITY", 1000),
            enqueue_wait: env_millis("WRITER_ENQUEUE_WAIT_MS", 25),
        }
    }
}

/// Knobs for the sync bus consumer and its hygiene task.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bus events older than this are purged.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            retention: env_secs("BUS_RETENTION_SECS", 600),
            cleanup_interval: env_secs("BUS_CLEANUP_INTERVAL_SECS", 60),
            reconnect_backoff: env_millis("BUS_RECONNECT_BACKOFF_MS", 250),
            max_reconnect_backoff: env_secs("BUS_MAX_RECONNECT_BACKOFF_SECS", 30),
        }
    }
}

/// Hot cache of recently committed message ids, keyed by room.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub recent_limit: usize,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: env_secs("CACHE_TTL_SECS", 24 * 60 * 60),
            recent_limit: env_usize("CACHE_RECENT_LIMIT", 100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    /// Default tracing directive; an explicit RUST_LOG still wins.
    pub log_level: String,
    pub shutdown_deadline: Duration,
    pub realtime: RealtimeConfig,
    pub writer: WriterConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
}

impl ServerConfig {
    pub fn init() -> &'static ServerConfig {
        SERVER_CONFIG.get_or_init(ServerConfig::from_env)
    }

    pub fn from_env() -> Self {
        Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            database_url: env_string("DATABASE_URL", "ws://localhost:8000"),
            database_namespace: env_string("DATABASE_NAMESPACE", "palaver"),
            database_name: env_string("DATABASE_NAME", "chat"),
            log_level: env_string("LOG_LEVEL", "info"),
            shutdown_deadline: env_secs("SHUTDOWN_DEADLINE_SECS", 30),
            realtime: RealtimeConfig::from_env(),
            writer: WriterConfig::from_env(),
            bus: BusConfig::from_env(),
            cache: CacheConfig::from_env(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default))
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default))
}
