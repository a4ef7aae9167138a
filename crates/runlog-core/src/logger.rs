//! Run logger: the scoped-run front end over a [`TrackingBackend`].
//!
//! `RunLogger::initialize()` authenticates against the configured service and
//! resolves the experiment. `open_run()` hands out an [`ActiveRun`] guard
//! that is ended exactly once: explicitly, or when it is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::TrackingBackend;
use crate::config::TrackingConfig;
use crate::error::{Result, RunlogError};
use crate::local::FileStore;
use crate::models::{now_millis, Experiment, Metric, Param, Run, RunInfo, RunStatus, RunTag};
use crate::rest::RestBackend;

pub const SOURCE_NAME_TAG: &str = "mlflow.source.name";
pub const SOURCE_TYPE_TAG: &str = "mlflow.source.type";

pub struct RunLogger {
    backend: Arc<dyn TrackingBackend>,
    experiment: Experiment,
    config: TrackingConfig,
}

impl RunLogger {
    /// Establish a session with the service selected by `config`: the hosted
    /// REST server when the tracking integration is on, the local file store
    /// otherwise.
    ///
    /// Fails with [`RunlogError::Authentication`] when credentials are
    /// rejected or the service cannot be reached.
    pub fn initialize(config: TrackingConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn TrackingBackend> = if config.tracking_integration {
            Arc::new(RestBackend::new(&config)?)
        } else {
            Arc::new(FileStore::new(config.local_root.clone()))
        };
        Self::with_backend(config, backend)
    }

    /// Like [`initialize`](Self::initialize) with a caller-supplied backend.
    pub fn with_backend(config: TrackingConfig, backend: Arc<dyn TrackingBackend>) -> Result<Self> {
        backend.verify()?;
        let experiment = backend.get_or_create_experiment(&config.experiment_name)?;
        info!(
            tracking = %backend.describe(),
            experiment = %experiment.name,
            experiment_id = %experiment.experiment_id,
            "RunLogger initialized"
        );
        Ok(Self {
            backend,
            experiment,
            config,
        })
    }

    /// Start a new run, named by the config's `run_name` if set.
    pub fn open_run(&self) -> Result<ActiveRun> {
        self.start(self.config.run_name.as_deref())
    }

    pub fn open_named_run(&self, run_name: &str) -> Result<ActiveRun> {
        self.start(Some(run_name))
    }

    fn start(&self, run_name: Option<&str>) -> Result<ActiveRun> {
        let mut tags = vec![RunTag::new(SOURCE_TYPE_TAG, "LOCAL")];
        if let Some(source) = source_name() {
            tags.push(RunTag::new(SOURCE_NAME_TAG, source));
        }

        let info = self.backend.create_run(
            &self.experiment.experiment_id,
            run_name,
            now_millis(),
            &tags,
        )?;
        info!(run_id = %info.run_id, run = %info.run_name, "Run started");
        Ok(ActiveRun {
            backend: Arc::clone(&self.backend),
            info,
            ended: false,
        })
    }

    /// Run `f` inside a fresh run. `Ok` ends the run `FINISHED`, `Err` ends it
    /// `FAILED`; the closure's error is returned unchanged.
    pub fn with_run<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ActiveRun) -> std::result::Result<T, E>,
        E: From<RunlogError>,
    {
        let run = self.open_run()?;
        match f(&run) {
            Ok(value) => {
                run.finish()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(end_err) = run.end(RunStatus::Failed) {
                    warn!(error = %end_err, "Failed to mark run as FAILED");
                }
                Err(e)
            }
        }
    }

    /// Fetch a run with its params, tags and latest metrics.
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.backend.get_run(run_id)
    }

    pub fn metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        self.backend.get_metric_history(run_id, key)
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn TrackingBackend> {
        &self.backend
    }
}

fn source_name() -> Option<String> {
    std::env::args().next()
}

/// An open run. Writes go straight to the backend; nothing is buffered.
///
/// Dropping the guard ends the run `FINISHED`, or `FAILED` while unwinding
/// from a panic.
pub struct ActiveRun {
    backend: Arc<dyn TrackingBackend>,
    info: RunInfo,
    ended: bool,
}

impl ActiveRun {
    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn log_param(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let param = Param::new(key, value);
        debug!(run_id = %self.info.run_id, key = %param.key, "log_param");
        self.backend.log_param(&self.info.run_id, &param)
    }

    /// Log several params in one request.
    pub fn log_params<I, K, V>(&self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params: Vec<Param> = params
            .into_iter()
            .map(|(k, v)| Param::new(k, v))
            .collect();
        self.backend.log_batch(&self.info.run_id, &[], &params, &[])
    }

    /// Log a metric at step 0.
    pub fn log_metric(&self, key: impl Into<String>, value: f64) -> Result<()> {
        self.log_metric_at(key, value, 0)
    }

    pub fn log_metric_at(&self, key: impl Into<String>, value: f64, step: i64) -> Result<()> {
        let metric = Metric::new(key, value, step);
        debug!(run_id = %self.info.run_id, key = %metric.key, value, step, "log_metric");
        self.backend.log_metric(&self.info.run_id, &metric)
    }

    /// Log several metrics at the same step in one request.
    pub fn log_metrics(&self, values: &HashMap<String, f64>, step: i64) -> Result<()> {
        let metrics: Vec<Metric> = values
            .iter()
            .map(|(k, v)| Metric::new(k.clone(), *v, step))
            .collect();
        self.backend.log_batch(&self.info.run_id, &metrics, &[], &[])
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.backend
            .set_tag(&self.info.run_id, &RunTag::new(key, value))
    }

    /// End the run `FINISHED`.
    pub fn finish(self) -> Result<RunInfo> {
        self.end(RunStatus::Finished)
    }

    pub fn end(mut self, status: RunStatus) -> Result<RunInfo> {
        self.close(status)
    }

    fn close(&mut self, status: RunStatus) -> Result<RunInfo> {
        self.ended = true;
        let info = self
            .backend
            .update_run(&self.info.run_id, status, now_millis())?;
        info!(
            run_id = %info.run_id,
            status = %info.status,
            duration_secs = info.duration_secs().unwrap_or_default(),
            "Run ended"
        );
        self.info = info.clone();
        Ok(info)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        let status = if std::thread::panicking() {
            RunStatus::Failed
        } else {
            RunStatus::Finished
        };
        if let Err(e) = self.close(status) {
            warn!(run_id = %self.info.run_id, error = %e, "Failed to end run on drop");
        }
    }
}

impl std::fmt::Debug for ActiveRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRun")
            .field("info", &self.info)
            .field("ended", &self.ended)
            .finish()
    }
}
