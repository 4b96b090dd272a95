//! Repository agent CLI.
//!
//! Drives a local code-generation engine over a repository: builds a bounded
//! context snapshot, asks the engine, applies the replacement blocks it emits
//! and optionally runs the test command.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use repoagent::agent::{AgentReport, EditOutcome, PlanOutcome, run_agent};
use repoagent::core::patch::{self, PatchError};
use repoagent::core::plan::extract_plan;
use repoagent::core::types::{Mode, TestOutcome};
use repoagent::exit_codes;
use repoagent::io::apply::{ApplyOutcome, ApplyReport, apply_changes};
use repoagent::io::config::{CONFIG_FILE_NAME, Config, load_config, write_config};
use repoagent::io::context::{ContextRequest, build_context};
use repoagent::io::engine::LlamaEngine;
use repoagent::io::test_runner::ShellTestRunner;
use repoagent::logging;
use repoagent::session::{AskChanges, AskReport, Observer, Session};

#[derive(Parser)]
#[command(
    name = "repoagent",
    version,
    about = "Repository agent driving a local code-generation engine"
)]
struct Cli {
    /// Config file (defaults to `.repoagent.toml` in the current directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Command-line overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
struct Overrides {
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    #[arg(long, global = true)]
    mode: Option<Mode>,
    /// Focus file (substring of a relative path) to inline in full.
    #[arg(long, global = true)]
    focus: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true)]
    engine_bin: Option<String>,
    #[arg(long, global = true)]
    test_cmd: Option<String>,
    #[arg(long, global = true)]
    max_total: Option<u64>,
    #[arg(long, global = true)]
    max_file: Option<u64>,
    #[arg(long, global = true)]
    ctx_size: Option<u32>,
    #[arg(long, global = true)]
    n_predict: Option<u32>,
    /// Apply replacement blocks from `ask` responses.
    #[arg(long, global = true)]
    apply: bool,
    /// Run the test command after changes were applied.
    #[arg(long, global = true)]
    run_tests: bool,
    /// Stream engine output while it is generated.
    #[arg(long, global = true)]
    stream: bool,
    /// List files only; do not inline file bodies.
    #[arg(long, global = true)]
    no_code: bool,
    /// Write prompts, responses and the report to this directory.
    #[arg(long, global = true)]
    transcripts: Option<PathBuf>,
}

impl Overrides {
    fn apply_to(self, config: &mut Config) {
        if let Some(workdir) = self.workdir {
            config.workdir = workdir;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(focus) = self.focus {
            config.focus_file = Some(focus);
        }
        if let Some(model) = self.model {
            config.engine.model = model;
        }
        if let Some(binary) = self.engine_bin {
            config.engine.binary = binary;
        }
        if let Some(command) = self.test_cmd {
            config.test.command = Some(command);
            config.run_tests = true;
        }
        if let Some(max_total) = self.max_total {
            config.context.max_total = max_total;
        }
        if let Some(max_file) = self.max_file {
            config.context.max_file = max_file;
        }
        if let Some(ctx_size) = self.ctx_size {
            config.engine.ctx_size = ctx_size;
        }
        if let Some(n_predict) = self.n_predict {
            config.engine.n_predict = n_predict;
        }
        if let Some(dir) = self.transcripts {
            config.transcript_dir = Some(dir);
        }
        config.apply_changes |= self.apply;
        config.run_tests |= self.run_tests;
        config.stream_output |= self.stream;
        if self.no_code {
            config.include_code = false;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the repository context snapshot.
    Context,
    /// Single-shot request; applies changes with `--apply`.
    Ask { task: String },
    /// Plan, edit each planned file, apply, then test.
    Agent { task: String },
    /// Apply the replacement blocks in a saved response (`-` for stdin).
    Apply { response: PathBuf },
    /// Print the file list a saved planning response names (`-` for stdin).
    Plan { response: PathBuf },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "info" } else { "warn" });

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    let json = cli.json;
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Context => cmd_context(effective_config(&config_path, cli.overrides)?, json),
        Command::Ask { task } => {
            cmd_ask(effective_config(&config_path, cli.overrides)?, &task, json)
        }
        Command::Agent { task } => {
            cmd_agent(effective_config(&config_path, cli.overrides)?, &task, json)
        }
        Command::Apply { response } => cmd_apply(
            effective_config(&config_path, cli.overrides)?,
            &response,
            json,
        ),
        Command::Plan { response } => cmd_plan(&response, json),
    }
}

/// Config file values with command-line overrides on top, validated.
fn effective_config(path: &Path, overrides: Overrides) -> Result<Config> {
    let mut config = load_config(path)?;
    overrides.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &Config::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_context(mut config: Config, json: bool) -> Result<i32> {
    config.resolve_workdir()?;
    let snapshot = build_context(
        &config.workdir,
        &config.context,
        ContextRequest {
            focus: config.focus_file.as_deref(),
            include_bodies: config.include_code,
        },
    )?;
    if json {
        print_json(&snapshot)?;
    } else {
        print!("{}", snapshot.text);
    }
    Ok(exit_codes::OK)
}

fn cmd_ask(config: Config, task: &str, json: bool) -> Result<i32> {
    let engine = LlamaEngine::new(&config.engine)?;
    let streaming = config.stream_output;
    let mut session = Session::new(config)?;
    let mut observer = CliObserver::new(json);
    let report = session.ask(&engine, &ShellTestRunner, task, &mut observer)?;

    if json {
        print_json(&report)?;
    } else {
        if !streaming {
            println!("{}", report.response);
        } else {
            println!();
        }
        print_ask_summary(&report);
    }
    Ok(ask_exit_code(&report))
}

fn cmd_agent(config: Config, task: &str, json: bool) -> Result<i32> {
    let engine = LlamaEngine::new(&config.engine)?;
    let mut session = Session::new(config)?;
    let mut observer = CliObserver::new(json);
    let report = run_agent(&mut session, &engine, &ShellTestRunner, task, &mut observer)?;

    if json {
        print_json(&report)?;
    } else {
        print_agent_summary(&report);
    }
    Ok(exit_code_for(&report.tests, Some(&report.apply)))
}

fn cmd_apply(mut config: Config, response_path: &Path, json: bool) -> Result<i32> {
    config.resolve_workdir()?;
    let text = read_input(response_path)?;
    let scan = patch::scan(&text);
    if let Some((offset, reason)) = scan.aborted {
        eprintln!(
            "warning: replacement blocks truncated at byte {offset} ({})",
            reason.as_str()
        );
    }
    let report = match scan.into_records() {
        Ok(mut records) => apply_changes(&config.workdir, &mut records),
        Err(PatchError::NotFound) => {
            if json {
                print_json(&ApplyReport::default())?;
            } else {
                println!("No file changes detected");
            }
            return Ok(exit_codes::OK);
        }
    };
    if json {
        print_json(&report)?;
    } else {
        print_apply_report(&report);
    }
    Ok(exit_code_for(&TestOutcome::Skipped, Some(&report)))
}

fn cmd_plan(response_path: &Path, json: bool) -> Result<i32> {
    let text = read_input(response_path)?;
    let files = extract_plan(&text);
    if json {
        print_json(&files)?;
    } else {
        for file in &files {
            println!("{file}");
        }
    }
    Ok(exit_codes::OK)
}

fn ask_exit_code(report: &AskReport) -> i32 {
    match &report.changes {
        AskChanges::Applied { report: applied } => exit_code_for(&report.tests, Some(applied)),
        AskChanges::Disabled | AskChanges::NoChanges => exit_code_for(&report.tests, None),
    }
}

fn exit_code_for(tests: &TestOutcome, apply: Option<&ApplyReport>) -> i32 {
    if tests.is_failure() {
        exit_codes::TESTS_FAILED
    } else if apply.is_some_and(ApplyReport::is_partial) {
        exit_codes::PARTIAL_APPLY
    } else {
        exit_codes::OK
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("read response from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn print_apply_report(report: &ApplyReport) {
    for result in &report.results {
        match &result.outcome {
            ApplyOutcome::Written { backup: Some(backup) } => {
                println!("  wrote {} (backup {backup})", result.path);
            }
            ApplyOutcome::Written { backup: None } => println!("  wrote {}", result.path),
            ApplyOutcome::Failed { error } => println!("  FAILED {}: {error}", result.path),
        }
    }
    println!("Applied {}/{} file changes", report.applied, report.total);
}

fn print_tests(tests: &TestOutcome) {
    match tests {
        TestOutcome::Skipped => {}
        TestOutcome::Passed { .. } => println!("Tests PASSED"),
        TestOutcome::Failed {
            exit_code, output, ..
        } => {
            print!("{output}");
            println!("Tests FAILED (exit code {exit_code:?})");
        }
        TestOutcome::LaunchFailed { error } => println!("Tests could not be launched: {error}"),
    }
}

fn print_ask_summary(report: &AskReport) {
    match &report.changes {
        AskChanges::Disabled => {}
        AskChanges::NoChanges => println!("No file changes detected"),
        AskChanges::Applied { report } => print_apply_report(report),
    }
    print_tests(&report.tests);
}

fn print_agent_summary(report: &AgentReport) {
    match &report.plan {
        PlanOutcome::Planned { files } => println!("Plan: {}", files.join(", ")),
        PlanOutcome::Empty => println!("Plan: no files named"),
        PlanOutcome::Failed { error } => println!("Plan failed: {error}"),
    }
    for edit in &report.edits {
        match &edit.outcome {
            EditOutcome::Applied { report } => {
                println!("  {}: applied {}/{}", edit.path, report.applied, report.total);
            }
            EditOutcome::NoChanges => println!("  {}: no changes", edit.path),
            EditOutcome::Failed { error } => println!("  {}: failed: {error}", edit.path),
        }
    }
    println!(
        "Files planned: {}, edited: {}, applied: {}/{}",
        report.files_planned(),
        report.files_edited(),
        report.apply.applied,
        report.apply.total
    );
    print_tests(&report.tests);
}

/// Status lines go to stderr; streamed output goes to stdout as it grows.
struct CliObserver {
    quiet: bool,
    printed: usize,
}

impl CliObserver {
    fn new(quiet: bool) -> Self {
        Self { quiet, printed: 0 }
    }
}

impl Observer for CliObserver {
    fn status(&mut self, line: &str) {
        if !self.quiet {
            eprintln!("{line}");
        }
        self.printed = 0;
    }

    fn partial_output(&mut self, text: &str) {
        if self.quiet {
            return;
        }
        if text.len() < self.printed || !text.is_char_boundary(self.printed) {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text[self.printed..].as_bytes());
        let _ = stdout.flush();
        self.printed = text.len();
    }
}
