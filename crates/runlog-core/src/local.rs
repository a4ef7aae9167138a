//! Local file-system tracking store, used when the hosted tracking
//! integration is disabled.
//!
//! ```text
//! <root>/<experiment_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/params.yaml
//! <root>/<experiment_id>/<run_id>/tags.yaml
//! <root>/<experiment_id>/<run_id>/metrics.parquet
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::backend::TrackingBackend;
use crate::config::DEFAULT_EXPERIMENT;
use crate::error::{Result, RunlogError};
use crate::models::{
    default_run_name, Experiment, Metric, Param, Run, RunData, RunInfo, RunStatus, RunTag,
};
use crate::storage;

const META_FILE: &str = "meta.yaml";
const PARAMS_FILE: &str = "params.yaml";
const TAGS_FILE: &str = "tags.yaml";
const METRICS_FILE: &str = "metrics.parquet";

pub const RUN_NAME_TAG: &str = "mlflow.runName";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let mut experiments = vec![];
        for id in storage::list_dirs(&self.root)? {
            let meta_path = self.root.join(&id).join(META_FILE);
            if meta_path.exists() {
                experiments.push(storage::read_yaml::<Experiment>(&meta_path)?);
            }
        }
        Ok(experiments)
    }

    /// Runs of one experiment, newest first.
    pub fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        let exp_dir = self.root.join(experiment_id);
        let mut runs = vec![];
        for name in storage::list_dirs(&exp_dir)? {
            let meta_path = exp_dir.join(&name).join(META_FILE);
            if meta_path.exists() {
                runs.push(storage::read_yaml::<RunInfo>(&meta_path)?);
            }
        }
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    fn find_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        for exp in storage::list_dirs(&self.root)? {
            let dir = self.root.join(exp).join(run_id);
            if dir.join(META_FILE).exists() {
                return Ok(dir);
            }
        }
        Err(RunlogError::RunNotFound(run_id.to_string()))
    }

    /// Directory of a run that still accepts writes.
    fn active_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.find_run_dir(run_id)?;
        let info: RunInfo = storage::read_yaml(&dir.join(META_FILE))?;
        if !info.is_active() {
            return Err(RunlogError::RunNotActive(run_id.to_string()));
        }
        Ok(dir)
    }

    fn next_experiment_id(&self, name: &str) -> Result<String> {
        if name == DEFAULT_EXPERIMENT && !self.root.join("0").exists() {
            return Ok("0".to_string());
        }
        let max = storage::list_dirs(&self.root)?
            .iter()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok((max + 1).to_string())
    }
}

fn write_param(dir: &Path, param: &Param) -> Result<()> {
    let path = dir.join(PARAMS_FILE);
    let mut params: BTreeMap<String, String> = storage::load_yaml(&path)?;
    match params.get(&param.key) {
        Some(existing) if existing == &param.value => return Ok(()),
        Some(existing) => {
            return Err(RunlogError::ParamConflict {
                key: param.key.clone(),
                existing: existing.clone(),
                new: param.value.clone(),
            })
        }
        None => {}
    }
    params.insert(param.key.clone(), param.value.clone());
    storage::save_yaml(&path, &params)
}

fn write_tags(dir: &Path, tags: &[RunTag]) -> Result<()> {
    let path = dir.join(TAGS_FILE);
    let mut existing: BTreeMap<String, String> = storage::load_yaml(&path)?;
    existing.extend(tags.iter().map(|t| (t.key.clone(), t.value.clone())));
    storage::save_yaml(&path, &existing)
}

impl TrackingBackend for FileStore {
    fn describe(&self) -> String {
        format!("file store at {}", self.root.display())
    }

    fn verify(&self) -> Result<()> {
        storage::ensure_dir(&self.root)
    }

    fn get_or_create_experiment(&self, name: &str) -> Result<Experiment> {
        if let Some(found) = self.list_experiments()?.into_iter().find(|e| e.name == name) {
            return Ok(found);
        }
        let experiment = Experiment::new(self.next_experiment_id(name)?, name);
        let dir = self.root.join(&experiment.experiment_id);
        storage::ensure_dir(&dir)?;
        storage::save_yaml(&dir.join(META_FILE), &experiment)?;
        debug!(experiment = %name, id = %experiment.experiment_id, "Created experiment");
        Ok(experiment)
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo> {
        let exp_dir = self.root.join(experiment_id);
        if !exp_dir.join(META_FILE).exists() {
            return Err(RunlogError::ExperimentNotFound(experiment_id.to_string()));
        }

        let run_name = run_name
            .map(str::to_string)
            .unwrap_or_else(default_run_name);
        let info = RunInfo::new(
            Uuid::new_v4().simple().to_string(),
            experiment_id,
            run_name.clone(),
            start_time,
        );

        let run_dir = exp_dir.join(&info.run_id);
        storage::ensure_dir(&run_dir)?;
        storage::save_yaml(&run_dir.join(META_FILE), &info)?;

        let mut all_tags = tags.to_vec();
        all_tags.push(RunTag::new(RUN_NAME_TAG, run_name));
        write_tags(&run_dir, &all_tags)?;
        Ok(info)
    }

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        write_param(&dir, param)
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        storage::append_metrics(&dir.join(METRICS_FILE), std::slice::from_ref(metric))
    }

    fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        for param in params {
            write_param(&dir, param)?;
        }
        storage::append_metrics(&dir.join(METRICS_FILE), metrics)?;
        if !tags.is_empty() {
            write_tags(&dir, tags)?;
        }
        Ok(())
    }

    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        write_tags(&dir, std::slice::from_ref(tag))
    }

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo> {
        let dir = self.find_run_dir(run_id)?;
        let meta_path = dir.join(META_FILE);
        let mut info: RunInfo = storage::read_yaml(&meta_path)?;
        info.status = status;
        if status.is_terminal() {
            info.end_time = Some(end_time);
        }
        storage::save_yaml(&meta_path, &info)?;
        Ok(info)
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let dir = self.find_run_dir(run_id)?;
        let info: RunInfo = storage::read_yaml(&dir.join(META_FILE))?;
        let params: BTreeMap<String, String> = storage::load_yaml(&dir.join(PARAMS_FILE))?;
        let tags: BTreeMap<String, String> = storage::load_yaml(&dir.join(TAGS_FILE))?;
        let history = storage::read_metrics(&dir.join(METRICS_FILE))?;

        Ok(Run {
            info,
            data: RunData {
                metrics: Metric::latest_per_key(&history),
                params: params.into_iter().map(|(k, v)| Param::new(k, v)).collect(),
                tags: tags.into_iter().map(|(k, v)| RunTag::new(k, v)).collect(),
            },
        })
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        let dir = self.find_run_dir(run_id)?;
        Ok(storage::read_metrics(&dir.join(METRICS_FILE))?
            .into_iter()
            .filter(|m| m.key == key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_millis;
    use tempfile::TempDir;

    fn store_with_run(tmp: &TempDir) -> (FileStore, RunInfo) {
        let store = FileStore::new(tmp.path().join("mlruns"));
        store.verify().unwrap();
        let exp = store.get_or_create_experiment(DEFAULT_EXPERIMENT).unwrap();
        let run = store
            .create_run(&exp.experiment_id, Some("unit"), now_millis(), &[])
            .unwrap();
        (store, run)
    }

    #[test]
    fn default_experiment_gets_id_zero_and_is_reused() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let first = store.get_or_create_experiment("Default").unwrap();
        let again = store.get_or_create_experiment("Default").unwrap();
        let other = store.get_or_create_experiment("baseline").unwrap();
        assert_eq!(first.experiment_id, "0");
        assert_eq!(again, first);
        assert_eq!(other.experiment_id, "1");
        assert_eq!(store.list_experiments().unwrap().len(), 2);
    }

    #[test]
    fn params_are_write_once() {
        let tmp = TempDir::new().unwrap();
        let (store, run) = store_with_run(&tmp);

        store.log_param(&run.run_id, &Param::new("lr", "0.1")).unwrap();
        store.log_param(&run.run_id, &Param::new("lr", "0.1")).unwrap();
        let err = store
            .log_param(&run.run_id, &Param::new("lr", "0.2"))
            .unwrap_err();
        assert!(matches!(err, RunlogError::ParamConflict { .. }));

        let fetched = store.get_run(&run.run_id).unwrap();
        assert_eq!(fetched.param("lr"), Some("0.1"));
        assert_eq!(fetched.tag(RUN_NAME_TAG), Some("unit"));
    }

    #[test]
    fn closed_run_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let (store, run) = store_with_run(&tmp);

        let closed = store
            .update_run(&run.run_id, RunStatus::Finished, now_millis())
            .unwrap();
        assert_eq!(closed.status, RunStatus::Finished);
        assert!(closed.end_time.is_some());

        let err = store
            .log_metric(&run.run_id, &Metric::new("loss", 1.0, 0))
            .unwrap_err();
        assert!(matches!(err, RunlogError::RunNotActive(_)));
        let err = store
            .set_tag(&run.run_id, &RunTag::new("k", "v"))
            .unwrap_err();
        assert!(matches!(err, RunlogError::RunNotActive(_)));
    }

    #[test]
    fn unknown_run_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (store, _) = store_with_run(&tmp);
        assert!(matches!(
            store.get_run("does-not-exist"),
            Err(RunlogError::RunNotFound(_))
        ));
    }

    #[test]
    fn history_keeps_every_step() {
        let tmp = TempDir::new().unwrap();
        let (store, run) = store_with_run(&tmp);

        store
            .log_batch(
                &run.run_id,
                &[Metric::new("loss", 0.9, 0), Metric::new("loss", 0.3, 1)],
                &[Param::new("epochs", "2")],
                &[RunTag::new("stage", "dev")],
            )
            .unwrap();

        let history = store.get_metric_history(&run.run_id, "loss").unwrap();
        assert_eq!(history.iter().map(|m| m.step).collect::<Vec<_>>(), vec![0, 1]);

        let fetched = store.get_run(&run.run_id).unwrap();
        assert_eq!(fetched.metric("loss").map(|m| m.value), Some(0.3));
        assert_eq!(fetched.param("epochs"), Some("2"));
        assert_eq!(fetched.tag("stage"), Some("dev"));
    }

    #[test]
    fn runs_list_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let exp = store.get_or_create_experiment("Default").unwrap();
        let older = store.create_run(&exp.experiment_id, None, 1_000, &[]).unwrap();
        let newer = store.create_run(&exp.experiment_id, None, 2_000, &[]).unwrap();

        let runs = store.list_runs(&exp.experiment_id).unwrap();
        assert_eq!(runs[0].run_id, newer.run_id);
        assert_eq!(runs[1].run_id, older.run_id);
    }
}
