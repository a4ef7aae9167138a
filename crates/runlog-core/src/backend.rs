//! The tracking-service contract consumed by [`RunLogger`](crate::RunLogger).

use crate::error::Result;
use crate::models::{Experiment, Metric, Param, Run, RunInfo, RunStatus, RunTag};

/// A tracking service: remote REST server, local file store, or a test stub.
///
/// Writes against a run that is not `RUNNING` must fail with
/// [`RunlogError::RunNotActive`](crate::RunlogError::RunNotActive); lookups of
/// unknown runs with [`RunlogError::RunNotFound`](crate::RunlogError::RunNotFound).
pub trait TrackingBackend: Send + Sync {
    /// Human-readable location of the service, for logs.
    fn describe(&self) -> String;

    /// Probe the service with the configured credentials.
    fn verify(&self) -> Result<()>;

    fn get_or_create_experiment(&self, name: &str) -> Result<Experiment>;

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo>;

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()>;

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()>;

    fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        for param in params {
            self.log_param(run_id, param)?;
        }
        for metric in metrics {
            self.log_metric(run_id, metric)?;
        }
        for tag in tags {
            self.set_tag(run_id, tag)?;
        }
        Ok(())
    }

    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()>;

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo>;

    fn get_run(&self, run_id: &str) -> Result<Run>;

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>>;
}
