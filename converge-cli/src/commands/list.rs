//! `converge list` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use converge_core::config::{ConvergeConfig, ScenarioConfig};

use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `list` command.
pub async fn execute(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading suite");
    let config = ConvergeConfig::load(config_path).await?;

    let list = ScenarioList {
        source: config_path.display().to_string(),
        scenarios: config.scenarios.iter().map(ScenarioSummary::from).collect(),
    };
    writer.render(&list)
}

/// Configured scenarios payload.
#[derive(Serialize)]
pub struct ScenarioList {
    /// Suite file path
    pub source: String,
    pub scenarios: Vec<ScenarioSummary>,
}

#[derive(Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub dir: String,
    pub isolate_workdir: bool,
    /// Number of `-var` assignments (values are not listed)
    pub vars: usize,
    pub var_files: usize,
}

impl From<&ScenarioConfig> for ScenarioSummary {
    fn from(s: &ScenarioConfig) -> Self {
        Self {
            name: s.name.clone(),
            dir: s.dir.display().to_string(),
            isolate_workdir: s.isolate_workdir,
            vars: s.vars.len(),
            var_files: s.var_files.len(),
        }
    }
}

impl Render for ScenarioList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Scenarios (source: {})", self.source.bold())?;
        if self.scenarios.is_empty() {
            writeln!(w, "  {}", "no scenarios configured".yellow())?;
            return Ok(());
        }

        writeln!(w)?;
        writeln!(
            w,
            "{:<20} {:<9} {:>4} {:>9}  {}",
            "NAME", "ISOLATED", "VARS", "VAR FILES", "DIRECTORY"
        )?;
        writeln!(w, "{}", "-".repeat(72))?;
        for s in &self.scenarios {
            let isolated = if s.isolate_workdir { "yes" } else { "no" };
            writeln!(
                w,
                "{:<20} {:<9} {:>4} {:>9}  {}",
                s.name, isolated, s.vars, s.var_files, s.dir
            )?;
        }
        Ok(())
    }
}
