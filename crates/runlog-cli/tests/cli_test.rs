//! CLI tests against the local store.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn runlog(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("runlog").unwrap();
    for var in [
        "MLFLOW_TRACKING_URI",
        "MLFLOW_TRACKING_USERNAME",
        "MLFLOW_TRACKING_PASSWORD",
        "MLFLOW_TRACKING_TOKEN",
        "DAGSHUB_USER_TOKEN",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn")
        .arg("--local")
        .arg("--root")
        .arg(root.path().join("mlruns"));
    cmd
}

#[test]
fn test_log_inspect_and_list() {
    let tmp = TempDir::new().unwrap();

    let output = runlog(&tmp)
        .args([
            "log",
            "--run-name",
            "demo",
            "-p",
            "parameter name=value",
            "-m",
            "metric name=1",
            "-m",
            "loss=0.5@3",
            "-t",
            "stage=cli",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged run"))
        .stdout(predicate::str::contains("FINISHED"))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let run_id = stdout
        .split_whitespace()
        .nth(2)
        .expect("run id in output")
        .to_string();

    runlog(&tmp)
        .args(["inspect", &run_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("parameter name"))
        .stdout(predicate::str::contains("metric name"))
        .stdout(predicate::str::contains("stage = cli"));

    runlog(&tmp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Default"))
        .stdout(predicate::str::contains("demo"));
}

#[test]
fn test_list_empty_store() {
    let tmp = TempDir::new().unwrap();
    runlog(&tmp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No experiments found"));
}

#[test]
fn test_malformed_metric_is_rejected() {
    let tmp = TempDir::new().unwrap();
    runlog(&tmp)
        .args(["log", "-m", "loss=high"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid metric value"));
}

#[test]
fn test_unreachable_server_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut cmd = Command::cargo_bin("runlog").unwrap();
    cmd.env("RUST_LOG", "off")
        .env_remove("MLFLOW_TRACKING_URI")
        .args(["--root"])
        .arg(tmp.path())
        .args([
            "--tracking-uri",
            &format!("http://127.0.0.1:{port}"),
            "log",
            "-p",
            "a=b",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not authenticate"));

    assert!(!tmp.path().join("0").exists());
}

#[test]
fn test_list_honours_experiment_from_config_file() {
    let tmp = TempDir::new().unwrap();
    runlog(&tmp)
        .args(["-e", "kidney", "log", "--run-name", "in-kidney", "-p", "a=b"])
        .assert()
        .success();
    runlog(&tmp)
        .args(["log", "--run-name", "in-default", "-p", "a=b"])
        .assert()
        .success();

    let config = tmp.path().join("runlog.yaml");
    std::fs::write(&config, "tracking_integration: false\nexperiment_name: kidney\n").unwrap();

    runlog(&tmp)
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("in-kidney"))
        .stdout(predicate::str::contains("in-default").not());
}
