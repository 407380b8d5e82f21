pub mod writer;

pub use writer::{EnqueueError, MessageWriter};
