pub mod auth;
pub mod bus;
pub mod error;
pub mod membership;
pub mod message;
pub mod presence;
pub mod user;

pub use auth::{AccessToken, AuthRepository};
pub use bus::SyncBusRepository;
pub use error::RepositoryError;
pub use membership::MembershipRepository;
pub use message::MessageRepository;
pub use presence::PresenceRepository;
pub use user::UserRepository;
