pub mod local;
pub mod remote;

pub use local::LocalUnitRegistry;
pub use remote::{Capabilities, RemoteStatus, RemoteUnit, RemoteUnitRegistry, StatusDocument};
