//! `converge run` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use converge_core::config::{ConvergeConfig, ScenarioConfig};
use converge_harness::{
    CleanupStatus, Harness, HarnessConfig, ProcessRunner, ScenarioReport, Suite, SuiteReport,
    Verdict,
};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run` command.
///
/// # Errors
///
/// - `CliError::Config` if the suite file or harness configuration is invalid
/// - `CliError::Command` if a requested scenario does not exist
/// - `CliError::ScenariosFailed` if any verdict failed (cleanup failures alone do not count)
pub async fn execute(
    args: RunArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading suite");
    let config = ConvergeConfig::load(config_path).await?;

    let harness_config = HarnessConfig::from_core(&config)?;
    let selected = select_scenarios(&config, &args.scenarios)?;
    let scenarios = selected
        .iter()
        .map(|s| harness_config.scenario_from_config(s))
        .collect::<Result<Vec<_>, _>>()?;

    let suite = Suite::from_config(&harness_config).fail_fast(args.fail_fast);
    let harness = Arc::new(Harness::new(Arc::new(ProcessRunner::new()), harness_config)?);

    info!(
        scenarios = scenarios.len(),
        max_parallel = suite.max_parallel(),
        "running suite"
    );

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_interrupt(
        cancel.clone(),
        args.timeout_secs.map(Duration::from_secs),
    ));

    let report = suite.run(harness, scenarios, cancel).await;
    watcher.abort();

    let payload = RunReport(report);
    writer.render(&payload)?;

    let report = payload.0;
    if report.success() {
        Ok(())
    } else {
        Err(CliError::ScenariosFailed {
            failed: report.failed,
            total: report.scenarios.len(),
        })
    }
}

/// Picks the requested scenarios in the order given, or all of them.
fn select_scenarios<'a>(
    config: &'a ConvergeConfig,
    names: &[String],
) -> Result<Vec<&'a ScenarioConfig>, CliError> {
    if names.is_empty() {
        return Ok(config.scenarios.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            config.scenario(name).ok_or_else(|| {
                let known: Vec<&str> = config.scenarios.iter().map(|s| s.name.as_str()).collect();
                CliError::Command(format!(
                    "unknown scenario: {name} (configured: {})",
                    known.join(", ")
                ))
            })
        })
        .collect()
}

/// Cancels the suite on Ctrl-C or when the optional suite timeout elapses.
async fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) {
    let deadline = async {
        match timeout {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            warn!("interrupt received, cancelling scenarios");
        }
        _ = deadline => {
            warn!(timeout_secs = timeout.map_or(0, |t| t.as_secs()), "suite timeout reached, cancelling scenarios");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

/// Suite result payload.
#[derive(Serialize)]
#[serde(transparent)]
pub struct RunReport(pub SuiteReport);

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let report = &self.0;
        writeln!(
            w,
            "{:<6} {:<20} {:<10} {:<16} {:<12} {:>10}",
            "RESULT", "SCENARIO", "RUN ID", "FINAL STATE", "CLEANUP", "DURATION"
        )?;
        writeln!(w, "{}", "-".repeat(79))?;

        for scenario in &report.scenarios {
            let result = if scenario.passed() {
                format!("{:<6}", "PASS").green().bold()
            } else {
                format!("{:<6}", "FAIL").red().bold()
            };
            let final_state = scenario
                .final_state()
                .map_or_else(|| "-".to_owned(), |s| s.to_string());
            writeln!(
                w,
                "{} {:<20} {:<10} {:<16} {:<12} {:>9.1}s",
                result,
                scenario.scenario,
                scenario.run_id,
                final_state,
                cleanup_label(&scenario.cleanup),
                scenario.duration().as_secs_f64()
            )?;
            write_details(w, scenario)?;
        }

        writeln!(w)?;
        let summary = format!(
            "{} passed, {} failed, {} cleanup failure(s)",
            report.passed, report.failed, report.cleanup_failures
        );
        if report.success() {
            writeln!(w, "{}", summary.green())?;
        } else {
            writeln!(w, "{}", summary.red())?;
        }
        Ok(())
    }
}

fn write_details(w: &mut dyn Write, scenario: &ScenarioReport) -> std::io::Result<()> {
    use colored::Colorize;

    if let Verdict::Failed { phase, error } = &scenario.verdict {
        writeln!(w, "       {} {}", format!("{phase}:").red(), error)?;
    }
    match &scenario.cleanup {
        CleanupStatus::Failed { error } => {
            writeln!(w, "       {} {}", "cleanup:".yellow(), error)?;
        }
        CleanupStatus::TimedOut => {
            writeln!(w, "       {} destroy timed out", "cleanup:".yellow())?;
        }
        CleanupStatus::Destroyed | CleanupStatus::Skipped => {}
    }
    Ok(())
}

fn cleanup_label(status: &CleanupStatus) -> &'static str {
    match status {
        CleanupStatus::Destroyed => "destroyed",
        CleanupStatus::Failed { .. } => "failed",
        CleanupStatus::TimedOut => "timed out",
        CleanupStatus::Skipped => "skipped",
    }
}
