pub mod app_config;
pub mod observability;
pub mod scheduler;
pub mod store;

// Re-export main types for easier imports
pub use app_config::{AppConfig, JobDefinition};
pub use observability::{ObservabilityConfig, RemoteConfig};
pub use scheduler::SchedulerConfig;
pub use store::{StoreBackend, StoreConfig};
