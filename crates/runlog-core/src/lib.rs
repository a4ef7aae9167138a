//! runlog-core: tracking client, scoped runs and local store for runlog.
//!
//! The central pattern: `RunLogger::initialize()` authenticates against the
//! tracking service, `open_run()` returns a guard that always ends the run,
//! and params/metrics written through the guard go straight to the service.

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod logger;
pub mod models;
pub mod rest;
pub mod storage;

pub use backend::TrackingBackend;
pub use config::{Credentials, TrackingConfig};
pub use error::{Result, RunlogError};
pub use local::FileStore;
pub use logger::{ActiveRun, RunLogger};
pub use models::{Experiment, Metric, Param, Run, RunData, RunInfo, RunStatus, RunTag};
pub use rest::RestBackend;
