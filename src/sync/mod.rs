pub mod cache;
pub mod debounce;
pub mod engine;
pub mod mutation;
pub mod session;
pub mod subscription;
pub mod token;

pub use engine::{Flow, SyncEngine};
pub use session::{Session, SessionEvent, SessionHandle, UserCommand};
