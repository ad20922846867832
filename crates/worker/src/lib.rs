pub mod executor_factory;
pub mod executors;

#[cfg(test)]
mod executors_test;

pub use executor_factory::{
    register_builtin_units, ShellUnitFactory, SleepUnitFactory, BUILTIN_AUTHORITY,
};
pub use executors::{ShellTaskParams, ShellUnit, SleepTaskParams, SleepUnit};
