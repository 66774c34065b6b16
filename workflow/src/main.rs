//! Produce/critique workflow runner.
//!
//! Plans a request into stages, runs each stage through an implement/review
//! loop against an external generation program, and prints what was achieved
//! per stage.

use std::fs;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use workflow::cancel::CancelToken;
use workflow::exit_codes;
use workflow::io::config::{DEFAULT_CONFIG_PATH, WorkflowConfig, load_config, write_config};
use workflow::io::plan_store::plan_violations;
use workflow::io::report::{write_events, write_report};
use workflow::logging;
use workflow::session::{Session, SessionReport};

#[derive(Parser)]
#[command(
    name = "workflow",
    version,
    about = "Plan a request into stages and drive each through produce/critique loops"
)]
struct Cli {
    /// Debug-level diagnostics for this crate (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append diagnostics to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,

        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run one session for a request.
    Run(RunArgs),
    /// Check a plan JSON file against the schema and plan invariants.
    ValidatePlan {
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// The request. Read from stdin when omitted.
    query: Option<String>,

    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run inside this directory instead of a temporary one.
    #[arg(long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Keep the temporary working directory after the session.
    #[arg(long)]
    keep_files: bool,

    /// Per-call timeout, overriding `invoker.timeout_secs`.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Cancel the whole session after this many seconds.
    #[arg(long, value_name = "SECS")]
    deadline_secs: Option<u64>,

    /// Keep running later stages after a stage fails.
    #[arg(long, conflicts_with = "fail_fast")]
    continue_on_failure: bool,

    /// Abort the plan on the first failed stage.
    #[arg(long)]
    fail_fast: bool,

    /// Write the session report as JSON.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Write the final event log as JSON lines.
    #[arg(long, value_name = "PATH")]
    events: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(args),
        Command::ValidatePlan { file } => cmd_validate_plan(&file),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &WorkflowConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate_plan(path: &Path) -> Result<i32> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let violations = plan_violations(&value)?;
    if violations.is_empty() {
        println!("{}: ok", path.display());
        return Ok(exit_codes::OK);
    }
    for violation in &violations {
        eprintln!("- {violation}");
    }
    eprintln!("{}: {} violation(s)", path.display(), violations.len());
    Ok(exit_codes::INVALID)
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args);
    let goal = read_query(args.query.as_deref())?;

    let cancel = match args.deadline_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("interrupt received, stopping session");
        on_interrupt.cancel();
    })
    .context("install interrupt handler")?;

    let mut session =
        Session::with_command_invoker(config, args.working_dir.as_deref(), args.keep_files, cancel)?;
    if let Some(dir) = session.working_dir() {
        eprintln!("working directory: {}", dir.display());
    }
    let report = session.run(&goal);
    print_summary(&report);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    if let Some(path) = &args.events {
        write_events(path, session.events())?;
    }
    if let Err(err) = session.close() {
        warn!(err = %format!("{err:#}"), "working directory cleanup failed");
    }
    Ok(exit_codes::for_status(report.status))
}

fn apply_overrides(config: &mut WorkflowConfig, args: &RunArgs) {
    if args.continue_on_failure {
        config.implementation.fail_fast = false;
    }
    if args.fail_fast {
        config.implementation.fail_fast = true;
    }
    if let Some(secs) = args.timeout_secs {
        config.invoker.timeout_secs = secs;
    }
}

fn read_query(query: Option<&str>) -> Result<String> {
    let goal = match query {
        Some(query) => query.to_string(),
        None => {
            let mut stdin = std::io::stdin();
            if stdin.is_terminal() {
                bail!("no query given: pass it as an argument or pipe it on stdin");
            }
            let mut buf = String::new();
            stdin.read_to_string(&mut buf).context("read query from stdin")?;
            buf
        }
    };
    if goal.trim().is_empty() {
        bail!("query must not be empty");
    }
    Ok(goal)
}

fn print_summary(report: &SessionReport) {
    println!("status: {:?}", report.status);
    match report.planning.outcome {
        Some(outcome) => println!(
            "planning: {} after {} iteration(s)",
            outcome.as_str(),
            report.planning.iterations
        ),
        None => println!("planning: interrupted"),
    }
    for stage in &report.stages {
        println!("[{}] {}: {}", stage.status.as_str(), stage.id, stage.description.trim());
        for unmet in &stage.unmet_criteria {
            println!("    unmet: {unmet}");
        }
        if let Some(error) = &stage.error {
            println!("    error: {error}");
        }
    }
    if let Some(error) = &report.error {
        println!("error ({}): {}", error.kind, error.message);
    }
    if let Some(text) = &report.final_report {
        println!("\n{}", text.trim());
    }
    if let Some(error) = &report.report_error {
        println!("final report unavailable: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["workflow", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false, .. }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["workflow", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "workflow",
            "run",
            "chart revenue",
            "--continue-on-failure",
            "--timeout-secs",
            "60",
            "--keep-files",
            "-v",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.query.as_deref(), Some("chart revenue"));
        assert!(args.keep_files);

        let mut config = WorkflowConfig::default();
        apply_overrides(&mut config, &args);
        assert!(!config.implementation.fail_fast);
        assert_eq!(config.invoker.timeout_secs, 60);
    }

    #[test]
    fn fail_fast_flags_conflict() {
        let parsed =
            Cli::try_parse_from(["workflow", "run", "q", "--fail-fast", "--continue-on-failure"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parse_validate_plan() {
        let cli = Cli::parse_from(["workflow", "validate-plan", "plan.json"]);
        assert!(matches!(cli.command, Command::ValidatePlan { ref file } if file == Path::new("plan.json")));
    }

    #[test]
    fn explicit_query_is_used() {
        assert_eq!(read_query(Some("do it")).expect("query"), "do it");
        assert!(read_query(Some("   ")).is_err());
    }
}
