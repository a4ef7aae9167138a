//! Log one illustrative parameter and metric to a hosted tracking server.
//!
//! ```text
//! DAGSHUB_USER_TOKEN=... cargo run -p runlog-core --example quickstart -- <owner> <repo>
//! ```
//! Pass `--local` as a third argument to write to `./mlruns` instead.

use runlog_core::{RunLogger, TrackingConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let owner = args.next().unwrap_or_default();
    let repo = args.next().unwrap_or_default();
    let tracking_integration = args.next().as_deref() != Some("--local");

    // 1. Explicit initialization; credentials come from the environment.
    let config = TrackingConfig::new(owner, repo, tracking_integration).with_env();
    let logger = RunLogger::initialize(config)?;

    // 2. Open a scoped run; it is ended when the closure returns.
    let run_id = logger.with_run(|run| {
        // 3. Record a parameter and a metric.
        run.log_param("parameter name", "value")?;
        run.log_metric("metric name", 1.0)?;
        Ok::<_, runlog_core::RunlogError>(run.run_id().to_string())
    })?;

    println!("Logged run {run_id} to {}", logger.backend().describe());
    Ok(())
}
