//! Session state for one run and the single-shot `ask` flow.
//!
//! A [`Session`] owns the configuration, the conversation history and the
//! transcript for the duration of one run; nothing here is process-global.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::history::History;
use crate::core::patch::{self, PatchError};
use crate::core::types::{Mode, TestOutcome};
use crate::io::apply::{ApplyReport, apply_changes};
use crate::io::config::Config;
use crate::io::context::{ContextRequest, Snapshot, build_context};
use crate::io::engine::Engine;
use crate::io::prompt::PromptCompiler;
use crate::io::test_runner::{TestRunner, run_configured_tests};
use crate::io::transcript::Transcript;

/// Progress callbacks for whoever drives a session (the CLI prints them).
///
/// Implementations must be `Send`: partial output is delivered from the
/// engine's output reader thread.
pub trait Observer: Send {
    /// One-line phase status summary.
    fn status(&mut self, _line: &str) {}
    /// Cleaned response so far, only when streaming is enabled.
    fn partial_output(&mut self, _text: &str) {}
}

/// Observer that ignores everything.
pub struct Silent;

impl Observer for Silent {}

/// Whether `ask` touched the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AskChanges {
    /// `apply_changes` is off.
    Disabled,
    /// The response contained no replacement blocks.
    NoChanges,
    Applied { report: ApplyReport },
}

impl AskChanges {
    pub fn applied(&self) -> usize {
        match self {
            AskChanges::Applied { report } => report.applied,
            AskChanges::Disabled | AskChanges::NoChanges => 0,
        }
    }
}

/// Everything `ask` produced.
#[derive(Debug, Clone, Serialize)]
pub struct AskReport {
    pub task: String,
    pub mode: Mode,
    pub response: String,
    pub changes: AskChanges,
    pub tests: TestOutcome,
    pub warnings: Vec<String>,
}

pub struct Session {
    config: Config,
    history: History,
    compiler: PromptCompiler,
    transcript: Transcript,
}

impl Session {
    /// Validate `config`, resolve its workdir and prepare the transcript.
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;
        config.resolve_workdir()?;
        let transcript = Transcript::from_option(config.transcript_dir.as_deref())?;
        Ok(Self {
            config,
            history: History::default(),
            compiler: PromptCompiler::new()?,
            transcript,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workdir(&self) -> &Path {
        &self.config.workdir
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn compiler(&self) -> &PromptCompiler {
        &self.compiler
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn snapshot(&self, focus: Option<&str>, include_bodies: bool) -> Result<Snapshot> {
        build_context(
            &self.config.workdir,
            &self.config.context,
            ContextRequest {
                focus,
                include_bodies,
            },
        )
    }

    /// Send `prompt` to the engine and record the exchange in the transcript.
    ///
    /// Partial output reaches `observer` only when `stream_output` is set.
    pub fn generate<E: Engine + ?Sized>(
        &mut self,
        engine: &E,
        phase: &str,
        prompt: &str,
        observer: &mut dyn Observer,
    ) -> Result<String> {
        let generated = if self.config.stream_output {
            let mut forward = |text: &str| observer.partial_output(text);
            engine.generate(prompt, Some(&mut forward))
        } else {
            engine.generate(prompt, None)
        };
        let response = generated.with_context(|| format!("{phase}: generation failed"))?;

        if let Err(e) = self.transcript.record(phase, prompt, &response) {
            warn!(phase, err = %format!("{e:#}"), "transcript not recorded");
            observer.status(&format!("warning: transcript not recorded: {e:#}"));
        }
        Ok(response)
    }

    /// Write the final report to the transcript; a failed write is only logged.
    pub(crate) fn write_report<T: Serialize>(&self, report: &T, observer: &mut dyn Observer) {
        if let Err(e) = self.transcript.write_report(report) {
            warn!(err = %format!("{e:#}"), "transcript report not written");
            observer.status(&format!("warning: transcript report not written: {e:#}"));
        }
    }

    /// Single-shot flow: context, prompt, generate, then optionally apply and test.
    ///
    /// Tests only run when at least one change was applied.
    #[instrument(skip_all, fields(mode = %self.config.mode))]
    pub fn ask<E: Engine + ?Sized, R: TestRunner + ?Sized>(
        &mut self,
        engine: &E,
        test_runner: &R,
        task: &str,
        observer: &mut dyn Observer,
    ) -> Result<AskReport> {
        let mut warnings = Vec::new();
        let focus = self.config.focus_file.clone();
        let snapshot = self.snapshot(focus.as_deref(), self.config.include_code)?;
        observer.status(&format!(
            "Context: {} entries, {} files inlined ({} bytes)",
            snapshot.entries.len(),
            snapshot.inlined.len(),
            snapshot.inlined_bytes
        ));

        let prompt = self
            .compiler
            .compile(self.config.mode, task, &self.history, &snapshot.text)?;
        observer.status("Generating response...");
        let response = self.generate(engine, "ask", &prompt, observer)?;
        self.history.push(task, response.clone());

        if response.trim().is_empty() {
            warn!("engine returned an empty response");
            warnings.push("engine returned an empty response".to_string());
            observer.status("Warning: empty response from engine");
        }

        let changes = if self.config.apply_changes {
            self.apply_response(&response, observer)
        } else {
            AskChanges::Disabled
        };

        let tests = if changes.applied() > 0 {
            self.run_tests(test_runner, observer)
        } else {
            TestOutcome::Skipped
        };

        let report = AskReport {
            task: task.to_string(),
            mode: self.config.mode,
            response,
            changes,
            tests,
            warnings,
        };
        self.write_report(&report, observer);
        Ok(report)
    }

    fn apply_response(&self, response: &str, observer: &mut dyn Observer) -> AskChanges {
        let scan = patch::scan(response);
        if let Some((offset, reason)) = scan.aborted {
            warn!(offset, reason = reason.as_str(), "replacement blocks truncated");
        }
        match scan.into_records() {
            Ok(mut records) => {
                let report = apply_changes(&self.config.workdir, &mut records);
                observer.status(&format!(
                    "Applied {}/{} file changes",
                    report.applied, report.total
                ));
                AskChanges::Applied { report }
            }
            Err(PatchError::NotFound) => {
                observer.status("No file changes detected in response");
                AskChanges::NoChanges
            }
        }
    }

    pub(crate) fn run_tests<R: TestRunner + ?Sized>(
        &self,
        test_runner: &R,
        observer: &mut dyn Observer,
    ) -> TestOutcome {
        if self.config.test_command().is_some() {
            observer.status("Running tests...");
        }
        let outcome = run_configured_tests(test_runner, &self.config);
        info!(outcome = outcome.label(), "test phase finished");
        match &outcome {
            TestOutcome::Skipped => {}
            TestOutcome::Passed { .. } => observer.status("Tests PASSED"),
            TestOutcome::Failed {
                exit_code,
                timed_out,
                ..
            } => {
                if *timed_out {
                    observer.status("Tests FAILED (timed out)");
                } else {
                    observer.status(&format!("Tests FAILED (exit code {exit_code:?})"));
                }
            }
            TestOutcome::LaunchFailed { error } => {
                observer.status(&format!("Tests could not be launched: {error}"));
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingObserver, ScriptedEngine, ScriptedTestRunner, TestRepo};

    fn session_for(repo: &TestRepo, edit: impl FnOnce(&mut Config)) -> Session {
        let mut config = repo.config();
        edit(&mut config);
        Session::new(config).expect("session")
    }

    #[test]
    fn transcript_failure_keeps_the_response() {
        let repo = TestRepo::new().with_file("x.c", "old\n");
        let transcripts = repo.join("transcripts");
        let mut session = session_for(&repo, |c| {
            c.mode = Mode::Edit;
            c.apply_changes = true;
            c.transcript_dir = Some(transcripts.clone());
        });
        std::fs::remove_dir_all(&transcripts).expect("remove transcripts");
        let engine = ScriptedEngine::new([repo.replacement("x.c", "new\n")]);
        let mut observer = RecordingObserver::default();

        let report = session
            .ask(&engine, &ScriptedTestRunner::passing(), "rewrite x", &mut observer)
            .expect("ask");

        assert_eq!(report.changes.applied(), 1);
        assert_eq!(repo.read("x.c"), "new\n");
        assert!(
            observer
                .lines
                .iter()
                .any(|l| l.starts_with("warning: transcript not recorded"))
        );
    }

    #[test]
    fn ask_without_apply_leaves_files_alone() {
        let repo = TestRepo::new().with_file("x.c", "old\n");
        let mut session = session_for(&repo, |_| {});
        let engine = ScriptedEngine::new([repo.replacement("x.c", "new\n")]);
        let tests = ScriptedTestRunner::passing();

        let report = session
            .ask(&engine, &tests, "rewrite x", &mut Silent)
            .expect("ask");

        assert_eq!(report.changes, AskChanges::Disabled);
        assert_eq!(report.tests, TestOutcome::Skipped);
        assert_eq!(repo.read("x.c"), "old\n");
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn ask_applies_and_runs_tests_after_changes() {
        let repo = TestRepo::new().with_file("x.c", "old\n").with_file("y.c", "y\n");
        let mut session = session_for(&repo, |c| {
            c.mode = Mode::Edit;
            c.apply_changes = true;
            c.run_tests = true;
            c.test.command = Some("make test".to_string());
        });
        let engine = ScriptedEngine::new([repo.replacement("x.c", "new\n")]);
        let tests = ScriptedTestRunner::passing();

        let report = session
            .ask(&engine, &tests, "rewrite x", &mut Silent)
            .expect("ask");

        let AskChanges::Applied { report: applied } = &report.changes else {
            panic!("expected applied changes, got {:?}", report.changes);
        };
        assert_eq!((applied.applied, applied.total), (1, 1));
        assert_eq!(repo.read("x.c"), "new\n");
        assert!(repo.exists("x.c.bak"));
        assert!(matches!(report.tests, TestOutcome::Passed { .. }));
        assert_eq!(tests.calls(), vec!["make test".to_string()]);
    }

    #[test]
    fn ask_skips_tests_when_nothing_applied() {
        let repo = TestRepo::new();
        let mut session = session_for(&repo, |c| {
            c.apply_changes = true;
            c.run_tests = true;
            c.test.command = Some("make test".to_string());
        });
        let engine = ScriptedEngine::new(["just an explanation"]);
        let tests = ScriptedTestRunner::passing();

        let report = session
            .ask(&engine, &tests, "explain", &mut Silent)
            .expect("ask");
        assert_eq!(report.changes, AskChanges::NoChanges);
        assert_eq!(report.tests, TestOutcome::Skipped);
        assert!(tests.calls().is_empty());
    }

    #[test]
    fn empty_response_is_a_warning() {
        let repo = TestRepo::new();
        let mut session = session_for(&repo, |_| {});
        let engine = ScriptedEngine::new([""]);
        let mut observer = RecordingObserver::default();

        let report = session
            .ask(&engine, &ScriptedTestRunner::passing(), "hello", &mut observer)
            .expect("ask");
        assert_eq!(report.warnings.len(), 1);
        assert!(observer.lines.iter().any(|l| l.contains("empty response")));
    }

    #[test]
    fn second_prompt_carries_history() {
        let repo = TestRepo::new();
        let mut session = session_for(&repo, |_| {});
        let engine = ScriptedEngine::new(["first answer", "second answer"]);
        let tests = ScriptedTestRunner::passing();

        session.ask(&engine, &tests, "first", &mut Silent).expect("ask");
        session.ask(&engine, &tests, "second", &mut Silent).expect("ask");

        let prompts = engine.prompts();
        assert!(!prompts[0].contains("<|conversation_history|>"));
        assert!(prompts[1].contains("User: first\nAssistant: first answer\n"));
    }

    #[test]
    fn streaming_forwards_partial_output() {
        let repo = TestRepo::new();
        let mut session = session_for(&repo, |c| c.stream_output = true);
        let engine = ScriptedEngine::new(["streamed"]);
        let mut observer = RecordingObserver::default();

        session
            .ask(&engine, &ScriptedTestRunner::passing(), "go", &mut observer)
            .expect("ask");
        assert_eq!(observer.partials, vec!["streamed".to_string()]);
    }

    #[test]
    fn engine_failure_is_an_error() {
        let repo = TestRepo::new();
        let mut session = session_for(&repo, |_| {});
        let engine = ScriptedEngine::failing("engine crashed");
        let err = session
            .ask(&engine, &ScriptedTestRunner::passing(), "go", &mut Silent)
            .expect_err("should fail");
        assert!(format!("{err:#}").contains("engine crashed"));
        assert!(session.history().is_empty());
    }

    #[test]
    fn transcript_records_exchange_and_report() {
        let repo = TestRepo::new();
        let transcripts = repo.path().join("transcripts");
        let dir = transcripts.clone();
        let mut session = session_for(&repo, move |c| c.transcript_dir = Some(dir));
        let engine = ScriptedEngine::new(["answer"]);

        session
            .ask(&engine, &ScriptedTestRunner::passing(), "go", &mut Silent)
            .expect("ask");
        assert!(transcripts.join("01-ask.prompt.txt").exists());
        assert_eq!(
            std::fs::read_to_string(transcripts.join("01-ask.response.txt")).expect("read"),
            "answer"
        );
        assert!(transcripts.join("report.json").exists());
    }
}
