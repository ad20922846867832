pub mod database;
pub mod in_memory_store;
pub mod notification;
pub mod registry;

pub use database::*;
pub use in_memory_store::InMemoryTaskStore;
pub use notification::BroadcastNotificationSink;
pub use registry::*;
