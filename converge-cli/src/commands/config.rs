//! `converge config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use converge_core::config::{ConvergeConfig, ScenarioConfig};
use converge_harness::HarnessConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const REDACTED: &str = "***REDACTED***";

/// Variable names that are masked in `config show` output.
const SENSITIVE_KEY_PARTS: &[&str] = &["password", "secret", "token", "credential", "key"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Execute the config validate subcommand.
///
/// Loads the suite file and also compiles it into a harness configuration,
/// so invalid retry patterns and timeouts are reported here rather than at run time.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let errors = match ConvergeConfig::load(config_path).await {
        Ok(config) => harness_errors(&config),
        Err(e) => vec![e.to_string()],
    };

    let report = ConfigValidationReport {
        source: config_path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }

    Ok(())
}

/// Errors the harness reports for an already parsed configuration.
fn harness_errors(config: &ConvergeConfig) -> Vec<String> {
    let harness = match HarnessConfig::from_core(config) {
        Ok(harness) => harness,
        Err(e) => return vec![e.to_string()],
    };
    config
        .scenarios
        .iter()
        .filter_map(|s| harness.scenario_from_config(s).err())
        .map(|e| e.to_string())
        .collect()
}

/// Execute the config show subcommand.
///
/// Displays the effective configuration (file + env overrides + defaults)
/// with scenario environment values and sensitive variables redacted.
///
/// # Errors
///
/// Returns `CliError::Config` if loading fails or `CliError::Command` if section name is invalid.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let mut config = ConvergeConfig::load(config_path).await?;
    redact_scenarios(&mut config.scenarios);

    let config_toml = match section.as_deref() {
        None => to_toml(&config),
        Some("general") => to_toml(&config.general),
        Some("tool") => to_toml(&config.tool),
        Some("retry") => to_toml(&config.retry),
        Some("suite") => to_toml(&config.suite),
        Some("scenarios") => to_toml(&ScenariosSection {
            scenarios: &config.scenarios,
        }),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: general, tool, retry, suite, scenarios)",
                other
            )));
        }
    };

    let report = ConfigReport {
        source: config_path.display().to_string(),
        section,
        config_toml,
    };

    writer.render(&report)?;

    Ok(())
}

/// A bare array cannot be a TOML document, so scenarios are shown under their table name.
#[derive(Serialize)]
struct ScenariosSection<'a> {
    scenarios: &'a [ScenarioConfig],
}

fn to_toml<T: Serialize>(value: &T) -> String {
    toml::to_string_pretty(value).unwrap_or_else(|e| format!("(serialization error: {})", e))
}

/// Mask every scenario env value and any variable whose name looks like a secret.
fn redact_scenarios(scenarios: &mut [ScenarioConfig]) {
    for scenario in scenarios {
        for value in scenario.env.values_mut() {
            *value = REDACTED.to_owned();
        }
        for (key, value) in scenario.vars.iter_mut() {
            if is_sensitive(key) {
                *value = REDACTED.to_owned();
            }
        }
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Configuration display report.
///
/// The `config_toml` field is skipped during JSON serialization (only used for text rendering).
#[derive(Serialize)]
pub struct ConfigReport {
    /// Configuration file path
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Serialized TOML configuration (redacted)
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;

        Ok(())
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    /// Configuration file path
    pub source: String,
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }

        Ok(())
    }
}
