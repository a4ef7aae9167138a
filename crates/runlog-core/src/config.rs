//! Tracking configuration.
//!
//! Built explicitly by the caller: from code, from a YAML file, and
//! optionally overlaid with the conventional `MLFLOW_*` / `DAGSHUB_*`
//! environment variables through [`TrackingConfig::with_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunlogError};

pub const DEFAULT_HOST: &str = "https://dagshub.com";
pub const DEFAULT_EXPERIMENT: &str = "Default";

/// How requests authenticate against the tracking service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    /// `Authorization: Bearer <token>`
    Token(String),
    /// HTTP Basic; DagsHub accepts the user token as password.
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => write!(f, "None"),
            Credentials::Token(_) => write!(f, "Token(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Owner of the hosted repository (user or organization).
    pub repo_owner: String,
    /// Repository whose tracking server receives the runs.
    pub repo_name: String,
    /// Send runs to the repository's hosted tracking server. When off, runs
    /// go to the local file store under `local_root`.
    pub tracking_integration: bool,
    pub host: String,
    /// Overrides the URI derived from `host`, `repo_owner` and `repo_name`.
    pub tracking_uri: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub experiment_name: String,
    pub run_name: Option<String>,
    pub local_root: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            repo_owner: String::new(),
            repo_name: String::new(),
            tracking_integration: true,
            host: DEFAULT_HOST.to_string(),
            tracking_uri: None,
            username: None,
            token: None,
            experiment_name: DEFAULT_EXPERIMENT.to_string(),
            run_name: None,
            local_root: PathBuf::from("mlruns"),
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for TrackingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("repo_owner", &self.repo_owner)
            .field("repo_name", &self.repo_name)
            .field("tracking_integration", &self.tracking_integration)
            .field("host", &self.host)
            .field("tracking_uri", &self.tracking_uri)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("experiment_name", &self.experiment_name)
            .field("run_name", &self.run_name)
            .field("local_root", &self.local_root)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl TrackingConfig {
    pub fn new(
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        tracking_integration: bool,
    ) -> Self {
        Self {
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            tracking_integration,
            ..Default::default()
        }
    }

    /// Config for the local file store rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            tracking_integration: false,
            local_root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_tracking_uri(mut self, uri: impl Into<String>) -> Self {
        self.tracking_uri = Some(uri.into());
        self
    }

    pub fn with_experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    /// Load from a YAML file. Missing keys take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackingConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn with_env(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which resolves an environment variable
    /// name to its value.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(uri) = lookup("MLFLOW_TRACKING_URI") {
            self.tracking_uri = Some(uri);
        }
        if let Some(username) = lookup("MLFLOW_TRACKING_USERNAME") {
            self.username = Some(username);
        }
        if let Some(token) = lookup("MLFLOW_TRACKING_PASSWORD")
            .or_else(|| lookup("MLFLOW_TRACKING_TOKEN"))
            .or_else(|| lookup("DAGSHUB_USER_TOKEN"))
        {
            self.token = Some(token);
        }
        self
    }

    /// Root URI of the tracking server, without a trailing slash.
    pub fn tracking_uri(&self) -> String {
        match &self.tracking_uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => format!(
                "{}/{}/{}.mlflow",
                self.host.trim_end_matches('/'),
                self.repo_owner,
                self.repo_name
            ),
        }
    }

    pub fn credentials(&self) -> Credentials {
        match (&self.username, &self.token) {
            (Some(username), Some(token)) => Credentials::Basic {
                username: username.clone(),
                password: token.clone(),
            },
            (None, Some(token)) => Credentials::Token(token.clone()),
            _ => Credentials::None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracking_integration && self.tracking_uri.is_none() {
            if self.repo_owner.trim().is_empty() {
                return Err(RunlogError::InvalidConfig(
                    "repo_owner must be set when tracking integration is enabled".into(),
                ));
            }
            if self.repo_name.trim().is_empty() {
                return Err(RunlogError::InvalidConfig(
                    "repo_name must be set when tracking integration is enabled".into(),
                ));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(RunlogError::InvalidConfig(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(RunlogError::InvalidConfig(
                "experiment_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
