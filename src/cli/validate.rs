use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::config::Config;
use crate::engine::control::ControlState;
use crate::engine::Engine;
use crate::stats::RunReport;

/// Load the scenario, run it once with a single user and print the report.
pub async fn run_validate(config: Config, control: Arc<ControlState>) -> Result<RunReport> {
    let path = config
        .scenario_file
        .clone()
        .context("no scenario file given (use -f <file>)")?;
    println!("Validating {}...", path.display());

    let engine = Engine::new(config, control)?;
    let scenario = engine.scenario();
    println!("  ✓ Scenario parsed");
    println!("    params: {}", scenario.param.len());
    println!("    pre: {} task(s)", scenario.pre.len());
    println!("    run: {} task(s)", scenario.run.len());
    println!("    pre_step: {} task(s)", scenario.pre_step.len());

    let report = engine.check().await?;
    println!("CHECK Finish!");
    print!("{}", report.render());
    Ok(report)
}
