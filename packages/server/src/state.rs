use std::sync::Arc;

use surrealdb::{Surreal, engine::any::Any};

use crate::auth::AuthService;
use crate::cache::RecentMessageCache;
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::persistence::MessageWriter;
use crate::realtime::RoomRegistry;
use crate::sync::BusPublisher;
use palaver_surrealdb::repository::{
    MembershipRepository, MessageRepository, PresenceRepository, UserRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Surreal<Any>,
    pub config: &'static ServerConfig,
    pub registry: Arc<RoomRegistry>,
    pub writer: Arc<MessageWriter>,
    pub publisher: Arc<dyn BusPublisher>,
    pub auth: AuthService,
    pub memberships: MembershipRepository,
    pub messages: MessageRepository,
    pub users: UserRepository,
    pub presence: PresenceRepository,
    pub recent_cache: RecentMessageCache,
    pub metrics: Arc<Metrics>,
}
