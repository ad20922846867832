//! # Jobrunner Testing Utils
//!
//! Shared testing utilities for the job runner workspace.
//!
//! ## Features
//!
//! - **Mock Stores**: in-memory task store that keeps every persisted version,
//!   a store that always fails, and one that can go down and recover
//! - **Mock Sinks**: recording and failing notification sinks
//! - **Scripted Units**: runnable units that replay a fixed list of lifecycle steps
//! - **Recording Listeners**: job/lifecycle listeners that capture what they saw
//! - **Test Data Builders**: utilities for creating task records and configs
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! jobrunner-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
