//! MLflow REST client.
//!
//! Requests are async `reqwest` calls driven to completion on a dedicated
//! single-worker tokio runtime, so the public API stays synchronous. Must not
//! be called from inside another tokio runtime.

use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::backend::TrackingBackend;
use crate::config::{Credentials, TrackingConfig};
use crate::error::{Result, RunlogError};
use crate::models::{Experiment, Metric, Param, Run, RunInfo, RunStatus, RunTag};

const API_PREFIX: &str = "api/2.0/mlflow";

/// MLflow error body: `{"error_code": "...", "message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct UpdateRunResponse {
    run_info: RunInfo,
}

#[derive(Deserialize)]
struct MetricHistoryResponse {
    #[serde(default)]
    metrics: Vec<Metric>,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_name: Option<&'a str>,
    start_time: i64,
    tags: &'a [RunTag],
}

#[derive(Serialize)]
struct LogMetricRequest<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    metric: &'a Metric,
}

pub struct RestBackend {
    tracking_uri: String,
    client: reqwest::Client,
    credentials: Credentials,
    runtime: Arc<Runtime>,
}

impl RestBackend {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("runlog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("runlog-http")
                .enable_all()
                .build()?,
        );

        Ok(Self {
            tracking_uri: config.tracking_uri(),
            client,
            credentials: config.credentials(),
            runtime,
        })
    }

    pub fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.tracking_uri, API_PREFIX, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::None => request,
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(endpoint = path, "POST");
        let request = self.authorize(self.client.post(self.endpoint(path)).json(body));
        self.runtime.block_on(async move { decode(request.send().await?).await })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(endpoint = path, "GET");
        let request = self.authorize(self.client.get(self.endpoint(path)).query(query));
        self.runtime.block_on(async move { decode(request.send().await?).await })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
        error_code: String::new(),
        message: text,
    });

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RunlogError::Authentication(format!(
            "tracking service answered {status}: {}",
            body.message
        )));
    }
    Err(RunlogError::Api {
        status: status.as_u16(),
        code: body.error_code,
        message: body.message,
    })
}

/// Translate service error codes on run-scoped calls into the typed variants.
fn run_error(err: RunlogError, run_id: &str) -> RunlogError {
    match err {
        RunlogError::Api { ref code, .. } if code == "RESOURCE_DOES_NOT_EXIST" => {
            RunlogError::RunNotFound(run_id.to_string())
        }
        RunlogError::Api { ref code, .. } if code == "INVALID_STATE" => {
            RunlogError::RunNotActive(run_id.to_string())
        }
        other => other,
    }
}

/// Map session-check failures that mean the service will not accept runs.
/// Hosted services answer 404 for repositories the caller cannot see.
fn verify_error(err: RunlogError, tracking_uri: &str) -> RunlogError {
    match err {
        RunlogError::Http(e) if e.is_connect() || e.is_timeout() => RunlogError::Authentication(
            format!("tracking service unreachable at {tracking_uri}: {e}"),
        ),
        RunlogError::Api { status: 404, .. } => RunlogError::Authentication(format!(
            "no tracking service at {tracking_uri}; check the repository and its access rights"
        )),
        other => other,
    }
}

impl TrackingBackend for RestBackend {
    fn describe(&self) -> String {
        self.tracking_uri.clone()
    }

    fn verify(&self) -> Result<()> {
        self.post::<_, Empty>("experiments/search", &json!({ "max_results": 1 }))
            .map(|_| ())
            .map_err(|e| verify_error(e, &self.tracking_uri))
    }

    fn get_or_create_experiment(&self, name: &str) -> Result<Experiment> {
        let found: Result<ExperimentResponse> =
            self.get("experiments/get-by-name", &[("experiment_name", name)]);
        match found {
            Ok(resp) => Ok(resp.experiment),
            Err(RunlogError::Api { code, .. }) if code == "RESOURCE_DOES_NOT_EXIST" => {
                let created: CreateExperimentResponse =
                    self.post("experiments/create", &json!({ "name": name }))?;
                Ok(Experiment::new(created.experiment_id, name))
            }
            Err(e) => Err(e),
        }
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo> {
        let request = CreateRunRequest {
            experiment_id,
            run_name,
            start_time,
            tags,
        };
        let resp: RunResponse = self.post("runs/create", &request)?;
        Ok(resp.run.info)
    }

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()> {
        let body = json!({ "run_id": run_id, "key": param.key, "value": param.value });
        self.post::<_, Empty>("runs/log-parameter", &body)
            .map(|_| ())
            .map_err(|e| run_error(e, run_id))
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        let body = LogMetricRequest { run_id, metric };
        self.post::<_, Empty>("runs/log-metric", &body)
            .map(|_| ())
            .map_err(|e| run_error(e, run_id))
    }

    fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "metrics": metrics,
            "params": params,
            "tags": tags,
        });
        self.post::<_, Empty>("runs/log-batch", &body)
            .map(|_| ())
            .map_err(|e| run_error(e, run_id))
    }

    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()> {
        let body = json!({ "run_id": run_id, "key": tag.key, "value": tag.value });
        self.post::<_, Empty>("runs/set-tag", &body)
            .map(|_| ())
            .map_err(|e| run_error(e, run_id))
    }

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo> {
        let body = json!({ "run_id": run_id, "status": status, "end_time": end_time });
        self.post::<_, UpdateRunResponse>("runs/update", &body)
            .map(|resp| resp.run_info)
            .map_err(|e| run_error(e, run_id))
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        self.get::<RunResponse>("runs/get", &[("run_id", run_id)])
            .map(|resp| resp.run)
            .map_err(|e| run_error(e, run_id))
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        self.get::<MetricHistoryResponse>(
            "metrics/get-history",
            &[("run_id", run_id), ("metric_key", key)],
        )
        .map(|resp| resp.metrics)
        .map_err(|e| run_error(e, run_id))
    }
}
