//! MLflow REST API 2.0 handlers (the subset runlog clients use).

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use runlog_core::models::{now_millis, Metric, Param, RunStatus, RunTag};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

/// JSON body extractor whose rejections render as MLflow error bodies.
#[derive(axum::extract::FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

#[derive(axum::extract::FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
struct ApiQuery<T>(T);

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/experiments/search", post(search_experiments))
        .route("/experiments/get-by-name", get(get_experiment_by_name))
        .route("/experiments/create", post(create_experiment))
        .route("/runs/create", post(create_run))
        .route("/runs/log-parameter", post(log_parameter))
        .route("/runs/log-metric", post(log_metric))
        .route("/runs/log-batch", post(log_batch))
        .route("/runs/set-tag", post(set_tag))
        .route("/runs/update", post(update_run))
        .route("/runs/get", get(get_run))
        .route("/metrics/get-history", get(get_metric_history))
}

fn empty() -> ApiResult {
    Ok(Json(json!({})))
}

// ─── Experiments ─────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct SearchExperimentsRequest {
    max_results: Option<usize>,
}

async fn search_experiments(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SearchExperimentsRequest>,
) -> ApiResult {
    let experiments = state.read()?.search_experiments(req.max_results.unwrap_or(1000));
    Ok(Json(json!({ "experiments": experiments })))
}

#[derive(Deserialize)]
struct ExperimentByNameQuery {
    experiment_name: String,
}

async fn get_experiment_by_name(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ExperimentByNameQuery>,
) -> ApiResult {
    let experiment = state.read()?.experiment_by_name(&q.experiment_name)?;
    Ok(Json(json!({ "experiment": experiment })))
}

#[derive(Deserialize)]
struct CreateExperimentRequest {
    name: String,
}

async fn create_experiment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateExperimentRequest>,
) -> ApiResult {
    let experiment_id = state.write()?.create_experiment(&req.name)?;
    debug!(experiment = %req.name, id = %experiment_id, "Created experiment");
    Ok(Json(json!({ "experiment_id": experiment_id })))
}

// ─── Runs ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateRunRequest {
    experiment_id: String,
    run_name: Option<String>,
    start_time: Option<i64>,
    #[serde(default)]
    tags: Vec<RunTag>,
}

async fn create_run(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateRunRequest>,
) -> ApiResult {
    let run = state.write()?.create_run(
        &req.experiment_id,
        req.run_name,
        req.start_time.unwrap_or_else(now_millis),
        &req.tags,
    )?;
    debug!(run_id = %run.info.run_id, "Created run");
    Ok(Json(json!({ "run": run })))
}

#[derive(Deserialize)]
struct LogParamRequest {
    run_id: String,
    key: String,
    value: String,
}

async fn log_parameter(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LogParamRequest>,
) -> ApiResult {
    state
        .write()?
        .log_param(&req.run_id, &Param::new(req.key, req.value))?;
    empty()
}

#[derive(Deserialize)]
struct LogMetricRequest {
    run_id: String,
    key: String,
    #[serde(with = "runlog_core::models::metric_value")]
    value: f64,
    timestamp: Option<i64>,
    step: Option<i64>,
}

async fn log_metric(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LogMetricRequest>,
) -> ApiResult {
    let metric = Metric {
        key: req.key,
        value: req.value,
        timestamp: req.timestamp.unwrap_or_else(now_millis),
        step: req.step.unwrap_or(0),
    };
    state.write()?.log_metric(&req.run_id, metric)?;
    empty()
}

#[derive(Deserialize)]
struct LogBatchRequest {
    run_id: String,
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    params: Vec<Param>,
    #[serde(default)]
    tags: Vec<RunTag>,
}

async fn log_batch(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LogBatchRequest>,
) -> ApiResult {
    state
        .write()?
        .log_batch(&req.run_id, req.metrics, &req.params, &req.tags)?;
    empty()
}

#[derive(Deserialize)]
struct SetTagRequest {
    run_id: String,
    key: String,
    value: String,
}

async fn set_tag(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SetTagRequest>,
) -> ApiResult {
    state
        .write()?
        .set_tag(&req.run_id, &RunTag::new(req.key, req.value))?;
    empty()
}

#[derive(Deserialize)]
struct UpdateRunRequest {
    run_id: String,
    status: Option<RunStatus>,
    end_time: Option<i64>,
}

async fn update_run(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UpdateRunRequest>,
) -> ApiResult {
    let run_info = state
        .write()?
        .update_run(&req.run_id, req.status, req.end_time)?;
    debug!(run_id = %run_info.run_id, status = %run_info.status, "Updated run");
    Ok(Json(json!({ "run_info": run_info })))
}

#[derive(Deserialize)]
struct RunQuery {
    run_id: String,
}

async fn get_run(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<RunQuery>,
) -> ApiResult {
    let run = state.read()?.get_run(&q.run_id)?;
    Ok(Json(json!({ "run": run })))
}

#[derive(Deserialize)]
struct MetricHistoryQuery {
    run_id: String,
    metric_key: String,
}

async fn get_metric_history(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<MetricHistoryQuery>,
) -> ApiResult {
    let metrics = state.read()?.metric_history(&q.run_id, &q.metric_key)?;
    Ok(Json(json!({ "metrics": metrics })))
}
