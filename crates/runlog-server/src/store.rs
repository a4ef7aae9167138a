//! In-memory tracking store backing the server.

use std::collections::{BTreeMap, HashMap};

use runlog_core::models::{
    default_run_name, Experiment, Metric, Param, Run, RunData, RunInfo, RunStatus, RunTag,
};
use uuid::Uuid;

use crate::error::ApiError;

pub const DEFAULT_EXPERIMENT_ID: &str = "0";
const RUN_NAME_TAG: &str = "mlflow.runName";

#[derive(Debug)]
struct RunRecord {
    info: RunInfo,
    params: BTreeMap<String, String>,
    tags: BTreeMap<String, String>,
    metrics: Vec<Metric>,
}

impl RunRecord {
    fn to_run(&self) -> Run {
        Run {
            info: self.info.clone(),
            data: RunData {
                metrics: Metric::latest_per_key(&self.metrics),
                params: self
                    .params
                    .iter()
                    .map(|(k, v)| Param::new(k.clone(), v.clone()))
                    .collect(),
                tags: self
                    .tags
                    .iter()
                    .map(|(k, v)| RunTag::new(k.clone(), v.clone()))
                    .collect(),
            },
        }
    }

    fn log_param(&mut self, param: &Param) -> Result<(), ApiError> {
        match self.params.get(&param.key) {
            Some(existing) if existing == &param.value => Ok(()),
            Some(existing) => Err(ApiError::InvalidParameter(format!(
                "Changing param values is not allowed. Param with key='{}' was already logged \
                 with value='{}' for run ID='{}'. Attempted logging new value '{}'.",
                param.key, existing, self.info.run_id, param.value
            ))),
            None => {
                self.params.insert(param.key.clone(), param.value.clone());
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub struct TrackingStore {
    experiments: Vec<Experiment>,
    runs: HashMap<String, RunRecord>,
}

impl Default for TrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingStore {
    pub fn new() -> Self {
        Self {
            experiments: vec![Experiment::new(DEFAULT_EXPERIMENT_ID, "Default")],
            runs: HashMap::new(),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn search_experiments(&self, max_results: usize) -> Vec<Experiment> {
        self.experiments.iter().take(max_results).cloned().collect()
    }

    pub fn experiment_by_name(&self, name: &str) -> Result<Experiment, ApiError> {
        self.experiments
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| {
                ApiError::NotFound(format!("Could not find experiment with name '{name}'"))
            })
    }

    pub fn create_experiment(&mut self, name: &str) -> Result<String, ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidParameter(
                "Experiment name must not be empty".into(),
            ));
        }
        if self.experiments.iter().any(|e| e.name == name) {
            return Err(ApiError::AlreadyExists(format!(
                "Experiment '{name}' already exists."
            )));
        }
        let id = self.experiments.len().to_string();
        self.experiments.push(Experiment::new(id.clone(), name));
        Ok(id)
    }

    pub fn create_run(
        &mut self,
        experiment_id: &str,
        run_name: Option<String>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<Run, ApiError> {
        if !self.experiments.iter().any(|e| e.experiment_id == experiment_id) {
            return Err(ApiError::NotFound(format!(
                "No Experiment with id={experiment_id} exists"
            )));
        }

        let run_name = run_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(default_run_name);
        let info = RunInfo::new(
            Uuid::new_v4().simple().to_string(),
            experiment_id,
            run_name.clone(),
            start_time,
        );

        let mut record = RunRecord {
            info,
            params: BTreeMap::new(),
            tags: tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect(),
            metrics: Vec::new(),
        };
        record.tags.insert(RUN_NAME_TAG.to_string(), run_name);

        let run = record.to_run();
        self.runs.insert(record.info.run_id.clone(), record);
        Ok(run)
    }

    fn run(&self, run_id: &str) -> Result<&RunRecord, ApiError> {
        self.runs
            .get(run_id)
            .ok_or_else(|| ApiError::NotFound(format!("Run with id={run_id} not found")))
    }

    fn active_run_mut(&mut self, run_id: &str) -> Result<&mut RunRecord, ApiError> {
        let record = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| ApiError::NotFound(format!("Run with id={run_id} not found")))?;
        if !record.info.is_active() {
            return Err(ApiError::InvalidState(format!(
                "The run {run_id} must be in the 'active' state. Current state is {}.",
                record.info.status
            )));
        }
        Ok(record)
    }

    pub fn log_param(&mut self, run_id: &str, param: &Param) -> Result<(), ApiError> {
        self.active_run_mut(run_id)?.log_param(param)
    }

    pub fn log_metric(&mut self, run_id: &str, metric: Metric) -> Result<(), ApiError> {
        self.active_run_mut(run_id)?.metrics.push(metric);
        Ok(())
    }

    pub fn log_batch(
        &mut self,
        run_id: &str,
        metrics: Vec<Metric>,
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<(), ApiError> {
        let record = self.active_run_mut(run_id)?;
        for param in params {
            record.log_param(param)?;
        }
        record.metrics.extend(metrics);
        for tag in tags {
            record.tags.insert(tag.key.clone(), tag.value.clone());
        }
        Ok(())
    }

    pub fn set_tag(&mut self, run_id: &str, tag: &RunTag) -> Result<(), ApiError> {
        let record = self.active_run_mut(run_id)?;
        record.tags.insert(tag.key.clone(), tag.value.clone());
        Ok(())
    }

    pub fn update_run(
        &mut self,
        run_id: &str,
        status: Option<RunStatus>,
        end_time: Option<i64>,
    ) -> Result<RunInfo, ApiError> {
        let record = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| ApiError::NotFound(format!("Run with id={run_id} not found")))?;
        if let Some(status) = status {
            record.info.status = status;
        }
        if end_time.is_some() {
            record.info.end_time = end_time;
        }
        Ok(record.info.clone())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run, ApiError> {
        Ok(self.run(run_id)?.to_run())
    }

    pub fn metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>, ApiError> {
        Ok(self
            .run(run_id)?
            .metrics
            .iter()
            .filter(|m| m.key == key)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_run() -> (TrackingStore, String) {
        let mut store = TrackingStore::new();
        let run = store
            .create_run(DEFAULT_EXPERIMENT_ID, Some("unit".into()), 0, &[])
            .unwrap();
        (store, run.info.run_id)
    }

    #[test]
    fn param_change_is_rejected() {
        let (mut store, run_id) = store_with_run();
        store.log_param(&run_id, &Param::new("lr", "0.1")).unwrap();
        store.log_param(&run_id, &Param::new("lr", "0.1")).unwrap();
        let err = store
            .log_param(&run_id, &Param::new("lr", "0.3"))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");
    }

    #[test]
    fn finished_run_is_read_only() {
        let (mut store, run_id) = store_with_run();
        store
            .update_run(&run_id, Some(RunStatus::Finished), Some(10))
            .unwrap();
        let err = store
            .log_metric(&run_id, Metric::new("loss", 0.1, 0))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(store.get_run(&run_id).unwrap().info.end_time, Some(10));
    }

    #[test]
    fn experiments_get_sequential_ids() {
        let mut store = TrackingStore::new();
        assert_eq!(store.create_experiment("a").unwrap(), "1");
        assert_eq!(store.create_experiment("b").unwrap(), "2");
        assert!(matches!(
            store.create_experiment("a"),
            Err(ApiError::AlreadyExists(_))
        ));
        assert_eq!(store.experiment_by_name("b").unwrap().experiment_id, "2");
        assert!(store.experiment_by_name("zzz").is_err());
    }

    #[test]
    fn run_against_unknown_experiment_fails() {
        let mut store = TrackingStore::new();
        let err = store.create_run("42", None, 0, &[]).unwrap_err();
        assert_eq!(err.error_code(), "RESOURCE_DOES_NOT_EXIST");
        assert_eq!(store.run_count(), 0);
    }
}
