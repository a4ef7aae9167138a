//! runlog CLI: log runs to a tracking server, inspect them, serve a local one.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing_subscriber::EnvFilter;

use runlog::server::{serve, AuthConfig, ServerConfig};
use runlog::config::DEFAULT_EXPERIMENT;
use runlog::{FileStore, RunInfo, RunLogger, RunlogError, TrackingBackend, TrackingConfig};

#[derive(Parser)]
#[command(
    name = "runlog",
    about = "Log experiment runs to an MLflow-compatible tracking server",
    version,
    author
)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where runs go. Overrides the config file and the environment.
#[derive(Args)]
struct TargetArgs {
    /// YAML tracking config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Repository owner on the tracking host
    #[arg(long, global = true)]
    owner: Option<String>,
    /// Repository name on the tracking host
    #[arg(long, global = true)]
    repo: Option<String>,
    /// Disable the hosted tracking integration and use the local store
    #[arg(long, global = true)]
    local: bool,
    /// Explicit tracking server URI
    #[arg(long, global = true)]
    tracking_uri: Option<String>,
    /// Root directory of the local store
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Experiment name
    #[arg(long, short, global = true)]
    experiment: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a run, log params/metrics/tags into it, and close it
    Log {
        /// Name of the run (generated if omitted)
        #[arg(long)]
        run_name: Option<String>,
        /// Parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p', value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Metric as key=value or key=value@step (repeatable)
        #[arg(long = "metric", short = 'm', value_parser = parse_metric)]
        metrics: Vec<MetricArg>,
        /// Tag as key=value (repeatable)
        #[arg(long = "tag", short = 't', value_parser = parse_key_value)]
        tags: Vec<(String, String)>,
    },
    /// Show a run's info, params and latest metrics
    Inspect {
        run_id: String,
    },
    /// List runs in the local store
    List,
    /// Start an in-memory tracking server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(long, default_value_t = 5000)]
        port: u16,
        /// Username required in Basic auth
        #[arg(long)]
        username: Option<String>,
        /// Token required from clients (Bearer, or Basic password)
        #[arg(long, env = "RUNLOG_SERVER_TOKEN")]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct MetricArg {
    key: String,
    value: f64,
    step: i64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Log {
            run_name,
            params,
            metrics,
            tags,
        } => cmd_log(&cli.target, run_name, params, metrics, tags),
        Commands::Inspect { run_id } => cmd_inspect(&cli.target, &run_id),
        Commands::List => cmd_list(&cli.target),
        Commands::Serve {
            host,
            port,
            username,
            token,
        } => cmd_serve(host, port, username, token),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

fn load_config(target: &TargetArgs) -> Result<TrackingConfig> {
    let config = match &target.config {
        Some(path) => TrackingConfig::from_yaml_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => TrackingConfig::default(),
    };
    let mut config = config.with_env();

    if let Some(owner) = &target.owner {
        config.repo_owner = owner.clone();
    }
    if let Some(repo) = &target.repo {
        config.repo_name = repo.clone();
    }
    if target.local {
        config.tracking_integration = false;
    }
    if let Some(uri) = &target.tracking_uri {
        config.tracking_uri = Some(uri.clone());
    }
    if let Some(root) = &target.root {
        config.local_root = root.clone();
    }
    if let Some(experiment) = &target.experiment {
        config.experiment_name = experiment.clone();
    }
    tracing::debug!(?config, "Resolved tracking config");
    Ok(config)
}

fn connect(config: TrackingConfig) -> Result<RunLogger> {
    match RunLogger::initialize(config) {
        Ok(logger) => Ok(logger),
        Err(e @ RunlogError::Authentication(_)) => {
            Err(anyhow::Error::new(e).context("could not authenticate with the tracking service"))
        }
        Err(e) => Err(e.into()),
    }
}

// ─── Command implementations ──────────────────────────────────────────────────

fn cmd_log(
    target: &TargetArgs,
    run_name: Option<String>,
    params: Vec<(String, String)>,
    metrics: Vec<MetricArg>,
    tags: Vec<(String, String)>,
) -> Result<()> {
    let mut config = load_config(target)?;
    if run_name.is_some() {
        config.run_name = run_name;
    }
    let logger = connect(config)?;

    let run_id = logger.with_run(|run| {
        if !params.is_empty() {
            run.log_params(params)?;
        }
        for m in &metrics {
            run.log_metric_at(m.key.clone(), m.value, m.step)?;
        }
        for (key, value) in tags {
            run.set_tag(key, value)?;
        }
        Ok::<_, RunlogError>(run.run_id().to_string())
    })?;

    let info = logger.get_run(&run_id)?.info;
    println!(
        "Logged run {} ({}) to {}: {}",
        info.run_id,
        info.run_name,
        logger.backend().describe(),
        info.status
    );
    Ok(())
}

fn cmd_inspect(target: &TargetArgs, run_id: &str) -> Result<()> {
    let logger = connect(load_config(target)?)?;
    let run = logger.get_run(run_id)?;

    println!("Run: {} ({})", run.info.run_name, run.info.run_id);
    println!("Experiment: {}", run.info.experiment_id);
    println!("Status: {}", run.info.status);
    println!("Started: {}", format_millis(run.info.start_time));
    if let Some(d) = run.info.duration_secs() {
        println!("Duration: {}", format_duration(d));
    }
    println!();

    if !run.data.params.is_empty() {
        println!("── Params ──────────────────────────────");
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(["Param", "Value"]);
        for p in &run.data.params {
            table.add_row([p.key.as_str(), p.value.as_str()]);
        }
        println!("{}", table);
    }

    if !run.data.metrics.is_empty() {
        println!("── Latest Metrics ──────────────────────");
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(["Metric", "Value", "Step"]);
        for m in &run.data.metrics {
            table.add_row([m.key.clone(), m.value.to_string(), m.step.to_string()]);
        }
        println!("{}", table);
    }

    if !run.data.tags.is_empty() {
        println!("── Tags ────────────────────────────────");
        for t in &run.data.tags {
            println!("  {} = {}", t.key, t.value);
        }
    }

    Ok(())
}

fn cmd_list(target: &TargetArgs) -> Result<()> {
    let config = load_config(target)?;
    let store = FileStore::new(config.local_root.clone());
    let experiments = store.list_experiments()?;

    if experiments.is_empty() {
        println!("No experiments found in '{}'", store.root().display());
        return Ok(());
    }

    let only = experiment_filter(target, &config);
    for experiment in experiments
        .iter()
        .filter(|e| only.is_none_or(|name| e.name == name))
    {
        let runs = store.list_runs(&experiment.experiment_id)?;
        println!("Experiment: {} (id {})", experiment.name, experiment.experiment_id);
        if runs.is_empty() {
            println!("  no runs");
            continue;
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(["Run ID", "Name", "Status", "Started", "Duration"]);
        for run in &runs {
            add_run_row(&mut table, run);
        }
        println!("{}", table);
    }

    Ok(())
}

/// Experiment to restrict `list` to: the `--experiment` flag, or a non-default
/// name from the config file or environment.
fn experiment_filter<'a>(target: &'a TargetArgs, config: &'a TrackingConfig) -> Option<&'a str> {
    target.experiment.as_deref().or_else(|| {
        (config.experiment_name != DEFAULT_EXPERIMENT).then_some(config.experiment_name.as_str())
    })
}

fn add_run_row(table: &mut Table, run: &RunInfo) {
    let duration = run
        .duration_secs()
        .map(format_duration)
        .unwrap_or_else(|| "running".to_string());
    table.add_row([
        run.run_id.clone(),
        run.run_name.clone(),
        run.status.to_string(),
        format_millis(run.start_time),
        duration,
    ]);
}

fn cmd_serve(
    host: String,
    port: u16,
    username: Option<String>,
    token: Option<String>,
) -> Result<()> {
    println!("runlog tracking server");
    println!("   URL:  http://{}:{}", host, port);
    println!(
        "   Auth: {}",
        if token.is_some() { "required" } else { "open" }
    );
    println!();

    let config = ServerConfig {
        host,
        port,
        auth: token.map(|token| AuthConfig { username, token }),
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_metric(s: &str) -> Result<MetricArg, String> {
    let (key, rest) = parse_key_value(s)?;
    let (value, step) = match rest.split_once('@') {
        Some((value, step)) => (
            value,
            step.parse::<i64>()
                .map_err(|e| format!("invalid step '{step}': {e}"))?,
        ),
        None => (rest.as_str(), 0),
    };
    let value = value
        .parse::<f64>()
        .map_err(|e| format!("invalid metric value '{value}': {e}"))?;
    Ok(MetricArg { key, value, step })
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(secs: f64) -> String {
    let secs = secs as u64;
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}h {}m", h, m)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_values() {
        assert_eq!(
            parse_key_value("parameter name=value").unwrap(),
            ("parameter name".to_string(), "value".to_string())
        );
        assert_eq!(
            parse_key_value("url=http://x?a=b").unwrap().1,
            "http://x?a=b"
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=v").is_err());
    }

    #[test]
    fn parses_metrics_with_optional_step() {
        assert_eq!(
            parse_metric("metric name=1").unwrap(),
            MetricArg {
                key: "metric name".into(),
                value: 1.0,
                step: 0
            }
        );
        let m = parse_metric("loss=0.25@7").unwrap();
        assert_eq!((m.value, m.step), (0.25, 7));
        assert!(parse_metric("loss=abc").is_err());
        assert!(parse_metric("loss=1@x").is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(5.4), "5s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(7260.0), "2h 1m");
    }

    #[test]
    fn list_filter_follows_resolved_experiment() {
        let cli = Cli::parse_from(["runlog", "list"]);
        let default = TrackingConfig::default();
        assert_eq!(experiment_filter(&cli.target, &default), None);

        let from_file = TrackingConfig::default().with_experiment("kidney");
        assert_eq!(experiment_filter(&cli.target, &from_file), Some("kidney"));

        let cli = Cli::parse_from(["runlog", "-e", "Default", "list"]);
        assert_eq!(experiment_filter(&cli.target, &default), Some("Default"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
