pub mod bus;
pub mod frame;
pub mod membership;
pub mod message;
pub mod presence;
pub mod reaction;
pub mod receipt;
pub mod room;
pub mod user;

pub use bus::*;
pub use frame::*;
pub use membership::*;
pub use message::*;
pub use presence::*;
pub use reaction::*;
pub use receipt::*;
pub use room::*;
pub use user::*;
