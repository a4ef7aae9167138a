//! End-to-end: the REST client and RunLogger against a live tracking server.

mod common;

use std::sync::Arc;

use runlog_core::models::{Param, RunStatus};
use runlog_core::{RestBackend, RunLogger, RunlogError, TrackingBackend, TrackingConfig};

fn config(uri: &str) -> TrackingConfig {
    TrackingConfig::new("acme", "models", true)
        .with_tracking_uri(uri)
        .with_username(common::USERNAME)
        .with_token(common::TOKEN)
}

#[test]
fn test_logged_values_read_back() {
    let (uri, _state) = common::spawn_server();
    let logger = RunLogger::initialize(config(&uri)).unwrap();

    let run_id = logger
        .with_run(|run| {
            run.log_param("parameter name", "value")?;
            run.log_metric("metric name", 1.0)?;
            Ok::<_, RunlogError>(run.run_id().to_string())
        })
        .unwrap();

    let run = logger.get_run(&run_id).unwrap();
    assert_eq!(run.param("parameter name"), Some("value"));
    let metric = run.metric("metric name").unwrap();
    assert_eq!(metric.value, 1.0);
    assert_eq!(metric.step, 0);
    assert_eq!(run.info.status, RunStatus::Finished);
    assert!(run.info.end_time.is_some());
}

#[test]
fn test_bearer_token_alone_is_accepted() {
    let (uri, _state) = common::spawn_server();
    let config = TrackingConfig::new("acme", "models", true)
        .with_tracking_uri(&uri)
        .with_token(common::TOKEN);
    assert!(RunLogger::initialize(config).is_ok());
}

#[test]
fn test_invalid_credentials_fail_and_create_no_run() {
    let (uri, state) = common::spawn_server();
    let config = TrackingConfig::new("acme", "models", true)
        .with_tracking_uri(&uri)
        .with_username(common::USERNAME)
        .with_token("wrong");

    let err = RunLogger::initialize(config).err().expect("should be rejected");
    assert!(err.is_authentication(), "unexpected error: {err}");
    assert_eq!(state.read().unwrap().run_count(), 0);
}

#[test]
fn test_named_experiment_is_created_remotely() {
    let (uri, _state) = common::spawn_server();
    let logger = RunLogger::initialize(config(&uri).with_experiment("kidney")).unwrap();
    assert_eq!(logger.experiment().name, "kidney");
    assert_ne!(logger.experiment().experiment_id, "0");

    let again = RunLogger::initialize(config(&uri).with_experiment("kidney")).unwrap();
    assert_eq!(again.experiment(), logger.experiment());
}

#[test]
fn test_closed_run_rejects_late_writes() {
    let (uri, _state) = common::spawn_server();
    let backend = Arc::new(RestBackend::new(&config(&uri)).unwrap());
    let logger = RunLogger::with_backend(config(&uri), backend.clone()).unwrap();

    let run_id = {
        let run = logger.open_named_run("short").unwrap();
        run.run_id().to_string()
    };

    let err = backend
        .log_param(&run_id, &Param::new("late", "write"))
        .unwrap_err();
    assert!(matches!(err, RunlogError::RunNotActive(_)), "got {err}");
    assert!(matches!(
        backend.get_run("no-such-run"),
        Err(RunlogError::RunNotFound(_))
    ));
}

#[test]
fn test_param_conflict_surfaces_as_api_error() {
    let (uri, _state) = common::spawn_server();
    let logger = RunLogger::initialize(config(&uri)).unwrap();

    let run = logger.open_run().unwrap();
    run.log_param("lr", "0.1").unwrap();
    let err = run.log_param("lr", "0.2").unwrap_err();
    assert!(matches!(
        err,
        RunlogError::Api { ref code, .. } if code == "INVALID_PARAMETER_VALUE"
    ));
    let info = run.finish().unwrap();
    assert_eq!(info.status, RunStatus::Finished);
}

#[test]
fn test_batched_metrics_keep_history() {
    let (uri, _state) = common::spawn_server();
    let logger = RunLogger::initialize(config(&uri)).unwrap();

    let run = logger.open_run().unwrap();
    for step in 0..3 {
        run.log_metric_at("loss", 1.0 - step as f64 * 0.25, step).unwrap();
    }
    run.log_params([("optimizer", "sgd")]).unwrap();
    run.set_tag("stage", "e2e").unwrap();
    let run_id = run.run_id().to_string();
    drop(run);

    let history = logger.metric_history(&run_id, "loss").unwrap();
    assert_eq!(history.len(), 3);
    let fetched = logger.get_run(&run_id).unwrap();
    assert_eq!(fetched.metric("loss").map(|m| m.value), Some(0.5));
    assert_eq!(fetched.param("optimizer"), Some("sgd"));
    assert_eq!(fetched.tag("stage"), Some("e2e"));
    assert_eq!(fetched.info.status, RunStatus::Finished);
}

#[test]
fn test_non_finite_metrics_cross_the_wire() {
    let (uri, _state) = common::spawn_server();
    let logger = RunLogger::initialize(config(&uri)).unwrap();

    let run = logger.open_run().unwrap();
    run.log_metric_at("loss", 0.5, 0).unwrap();
    run.log_metric_at("loss", f64::NAN, 1).unwrap();
    run.log_metric("grad_norm", f64::INFINITY).unwrap();
    let mut batch = std::collections::HashMap::new();
    batch.insert("log_prob".to_string(), f64::NEG_INFINITY);
    run.log_metrics(&batch, 2).unwrap();
    let run_id = run.run_id().to_string();
    run.finish().unwrap();

    let fetched = logger.get_run(&run_id).unwrap();
    assert!(fetched.metric("loss").unwrap().value.is_nan());
    assert_eq!(fetched.metric("grad_norm").unwrap().value, f64::INFINITY);
    assert_eq!(fetched.metric("log_prob").unwrap().value, f64::NEG_INFINITY);

    let history = logger.metric_history(&run_id, "loss").unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|m| m.value.is_nan()));
}

#[test]
fn test_unknown_repository_fails_as_authentication() {
    let (uri, state) = common::spawn_server();
    let config = TrackingConfig::new("acme", "models", true)
        .with_tracking_uri(format!("{uri}/acme/private.mlflow"))
        .with_username(common::USERNAME)
        .with_token(common::TOKEN);

    let err = RunLogger::initialize(config).err().expect("should be rejected");
    assert!(err.is_authentication(), "unexpected error: {err}");
    assert_eq!(state.read().unwrap().run_count(), 0);
}
