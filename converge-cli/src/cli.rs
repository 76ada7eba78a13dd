//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Converge -- reconciliation test harness for infrastructure configurations.
///
/// Use `converge <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "converge", version, about, long_about = None)]
pub struct Cli {
    /// Path to the converge.toml suite file.
    #[arg(short, long, global = true, default_value = "converge.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios through init, validate, apply, re-apply and destroy.
    Run(RunArgs),

    /// List the scenarios configured in the suite file.
    List,

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run ----

/// Run the configured scenarios.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run only the named scenario (repeatable; default: all).
    #[arg(short, long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Cancel the whole suite after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Stop starting new scenarios after the first failure.
    #[arg(long)]
    pub fail_fast: bool,
}

// ---- config ----

/// Manage converge configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the suite file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, tool, retry, suite, scenarios).
        #[arg(long)]
        section: Option<String>,
    },
}
