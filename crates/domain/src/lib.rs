pub mod entities;
pub mod events;
pub mod job;
pub mod ports;
pub mod unit;

pub use entities::*;
pub use events::*;
pub use job::*;
pub use jobrunner_core::{SchedulerError, SchedulerResult};
pub use ports::*;
pub use unit::*;
