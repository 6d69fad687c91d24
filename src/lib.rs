pub mod adapter;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use config::SyncConfiguration;
pub use core::{CycleReport, SyncCoordinator};
pub use error::SyncError;
