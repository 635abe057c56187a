pub mod clock;
pub mod communication;
pub mod config;
pub mod memory_store;
pub mod record_key;
pub mod render;
pub mod sync;
pub mod sync_error;
pub mod task;

pub use config::ClientConfig;
pub use sync::{Session, SessionHandle, UserCommand};
pub use sync_error::SyncError;

#[cfg(test)]
pub mod tests;
