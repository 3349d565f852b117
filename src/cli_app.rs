//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use exec_view_sync::cli::simulate::{SimulateOptions, SimulationReport, run_simulation};
use exec_view_sync::cli::{Verbosity, init_tracing};
use exec_view_sync::core::config::Config;
use exec_view_sync::core::errors::SyncError;
use exec_view_sync::logger::journal::{JournalEvent, spawn_journal};

/// Exec view sync — background scans feeding UI-thread table models.
#[derive(Debug, Parser)]
#[command(
    name = "evsync",
    author,
    version,
    about = "Exec view sync - tree-to-view synchronization simulator",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Simulate a session: random results, node switch, final consistency check.
    Simulate(SimulateArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Show version.
    Version,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Number of tree nodes to populate.
    #[arg(long, default_value_t = 3, value_name = "N")]
    nodes: usize,
    /// Tests published per node.
    #[arg(long, default_value_t = 500, value_name = "N")]
    tests: usize,
    /// Fraction of tests rejected by the filter.
    #[arg(long, default_value_t = 0.1, value_name = "RATIO")]
    filtered: f64,
    /// Switch to the second node after this many outcomes.
    #[arg(long, default_value_t = 200, value_name = "N")]
    switch_after: usize,
    /// Keep the first node's cache unavailable this long.
    #[arg(long, default_value_t = 50, value_name = "MS")]
    pending_ms: u64,
    /// Pause between outcomes.
    #[arg(long, default_value_t = 0, value_name = "US")]
    delay_us: u64,
    /// Abort waiting for the views after this long.
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    timeout: u64,
    /// RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
    /// Write the sync journal here instead of the configured path.
    #[arg(long, value_name = "PATH", conflicts_with = "no_journal")]
    journal: Option<PathBuf>,
    /// Disable the sync journal.
    #[arg(long)]
    no_journal: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Views did not match their caches.
    #[error("{0}")]
    Inconsistent(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidConfig { .. }
            | SyncError::MissingConfig { .. }
            | SyncError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Inconsistent(_) => 4,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    init_tracing(Verbosity::from_flags(cli.verbose, cli.quiet));
    match &cli.command {
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version => emit_version(cli),
    }
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if args.no_journal {
        config.journal.enabled = false;
    }
    if let Some(path) = &args.journal {
        config.journal.enabled = true;
        config.journal.path.clone_from(path);
    }
    exec_view_sync::core::lock_order::set_checks_enabled(config.debug.lock_order_checks);

    let options = SimulateOptions {
        nodes: args.nodes,
        tests_per_node: args.tests,
        filtered_ratio: args.filtered,
        switch_after: args.switch_after,
        pending_for: Duration::from_millis(args.pending_ms),
        publish_delay: Duration::from_micros(args.delay_us),
        timeout: Duration::from_secs(args.timeout),
        seed: args.seed,
    };

    let (journal, journal_thread) = spawn_journal(&config.journal)?;
    journal.send(JournalEvent::SessionStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash()?,
    });
    let result = run_simulation(&options, &config, journal.clone());
    if let Err(err) = &result {
        journal.send(JournalEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
    journal.send(JournalEvent::SessionStopped {
        dropped_events: journal.dropped_events(),
    });
    journal.shutdown();
    if let Some(handle) = journal_thread {
        let _ = handle.join();
    }
    let report = result?;

    let journal_path = config
        .journal
        .enabled
        .then(|| config.journal.path.clone());
    match output_mode(cli) {
        OutputMode::Human => print_report_human(&report, journal_path.as_ref()),
        OutputMode::Json => {
            let payload = json!({
                "command": "simulate",
                "report": serde_json::to_value(&report)?,
                "journal": journal_path.as_ref().map(|p| p.to_string_lossy()),
            });
            write_json_line(&payload)?;
        }
    }

    if report.consistent {
        Ok(())
    } else {
        Err(CliError::Inconsistent(format!(
            "views diverged from cache contents (seed {})",
            report.seed
        )))
    }
}

fn print_report_human(report: &SimulationReport, journal: Option<&PathBuf>) {
    println!("seed: {}", report.seed);
    println!(
        "published {} outcomes across {} nodes in {} ms",
        report.published,
        report.nodes.len(),
        report.elapsed_ms
    );
    if report.switched {
        println!("switched node mid-scan");
    }
    println!(
        "displayed: {}",
        report.displayed.as_deref().unwrap_or("(none)")
    );
    println!("{:<14} {:>8} {:>8} {:>8}", "tab", "enabled", "rows", "cache");
    for tab in &report.tabs {
        println!(
            "{:<14} {:>8} {:>8} {:>8}",
            tab.tab,
            if tab.enabled { "yes" } else { "no" },
            tab.rows,
            tab.expected
        );
    }
    println!("status: {}", report.status);
    println!("ui tasks run: {}", report.ui_tasks_run);
    if let Some(path) = journal {
        println!("journal: {}", path.display());
    }
    println!(
        "result: {}",
        if report.consistent {
            "consistent"
        } else {
            "INCONSISTENT"
        }
    );
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Configuration is valid.");
                    println!("  Source: {}", config.paths.config_file.display());
                    println!("  Hash: {hash}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config validate",
                        "valid": true,
                        "source": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn emit_version(cli: &Cli) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    match output_mode(cli) {
        OutputMode::Human => println!("evsync {version}"),
        OutputMode::Json => {
            let payload = json!({
                "binary": "evsync",
                "version": version,
                "package": env!("CARGO_PKG_NAME"),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("EVS_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "evsync",
            "--config",
            "/tmp/evsync.toml",
            "--json",
            "-v",
            "simulate",
        ]);
        assert!(before.is_ok());
        let after = Cli::try_parse_from(["evsync", "simulate", "--json", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_simulate_options() {
        let cli = Cli::try_parse_from([
            "evsync",
            "simulate",
            "--nodes",
            "4",
            "--tests",
            "1000",
            "--seed",
            "42",
            "--no-journal",
        ])
        .expect("parse");
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.nodes, 4);
        assert_eq!(args.tests, 1000);
        assert_eq!(args.seed, Some(42));
        assert!(args.no_journal);
    }

    #[test]
    fn journal_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "evsync",
            "simulate",
            "--journal",
            "/tmp/j.jsonl",
            "--no-journal",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["evsync", "-v", "-q", "version"]).is_err());
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("JSON"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("bogus"), false), OutputMode::Json);
    }

    #[test]
    fn config_errors_map_to_user_exit_code() {
        let err = CliError::from(SyncError::InvalidConfig {
            details: "bad".to_string(),
        });
        assert_eq!(err.exit_code(), 1);
        let err = CliError::from(SyncError::Runtime {
            details: "boom".to_string(),
        });
        assert_eq!(err.exit_code(), 2);
    }
}
