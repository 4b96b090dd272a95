//! Multi-phase agent controller: PLAN, then EDIT per planned file, then TEST.
//!
//! The phases run once each, in order, with no retries. A failing phase is
//! recorded in the report and the controller moves on: an empty or failed
//! plan leads to an empty edit phase, a failed edit does not stop the next
//! one, and tests run even when nothing was applied.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::patch::{self, PatchError};
use crate::core::plan::extract_plan;
use crate::core::types::{Mode, TestOutcome};
use crate::io::apply::{ApplyReport, apply_changes};
use crate::io::engine::Engine;
use crate::io::test_runner::TestRunner;
use crate::session::{Observer, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanOutcome {
    Planned { files: Vec<String> },
    /// The response named no files.
    Empty,
    /// Context or generation failed.
    Failed { error: String },
}

impl PlanOutcome {
    pub fn files(&self) -> &[String] {
        match self {
            PlanOutcome::Planned { files } => files,
            PlanOutcome::Empty | PlanOutcome::Failed { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied { report: ApplyReport },
    /// The response contained no replacement blocks.
    NoChanges,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: EditOutcome,
}

/// Overall result of one agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub task: String,
    pub plan: PlanOutcome,
    pub edits: Vec<EditReport>,
    /// All edit-phase applications summed.
    pub apply: ApplyReport,
    pub tests: TestOutcome,
}

impl AgentReport {
    pub fn files_planned(&self) -> usize {
        self.plan.files().len()
    }

    /// Planned files whose edit produced at least one replacement block.
    pub fn files_edited(&self) -> usize {
        self.edits
            .iter()
            .filter(|edit| matches!(edit.outcome, EditOutcome::Applied { .. }))
            .count()
    }

    pub fn files_applied(&self) -> usize {
        self.apply.applied
    }
}

/// Run PLAN → EDIT[] → TEST for `task` within `session`.
///
/// Only prompt rendering failures are returned as errors; phase failures
/// are part of the report.
#[instrument(skip_all)]
pub fn run_agent<E: Engine + ?Sized, R: TestRunner + ?Sized>(
    session: &mut Session,
    engine: &E,
    test_runner: &R,
    task: &str,
    observer: &mut dyn Observer,
) -> Result<AgentReport> {
    observer.status("Phase 1: planning");
    let plan = plan_phase(session, engine, task, observer)?;

    let files = plan.files().to_vec();
    observer.status(&format!("Phase 2: editing {} file(s)", files.len()));
    let mut edits = Vec::with_capacity(files.len());
    let mut apply = ApplyReport::default();
    for (idx, path) in files.iter().enumerate() {
        observer.status(&format!("[{}/{}] {path}", idx + 1, files.len()));
        let outcome = edit_phase(session, engine, task, path, idx + 1, files.len(), observer)?;
        if let EditOutcome::Applied { report } = &outcome {
            apply.absorb(report.clone());
        }
        edits.push(EditReport {
            path: path.clone(),
            outcome,
        });
    }

    observer.status(&format!(
        "Phase 3: applied {}/{} change(s), testing",
        apply.applied, apply.total
    ));
    let tests = session.run_tests(test_runner, observer);

    let report = AgentReport {
        task: task.to_string(),
        plan,
        edits,
        apply,
        tests,
    };
    info!(
        planned = report.files_planned(),
        edited = report.files_edited(),
        applied = report.files_applied(),
        tests = report.tests.label(),
        "agent finished"
    );
    session.write_report(&report, observer);
    Ok(report)
}

fn plan_phase<E: Engine + ?Sized>(
    session: &mut Session,
    engine: &E,
    task: &str,
    observer: &mut dyn Observer,
) -> Result<PlanOutcome> {
    let snapshot = match session.snapshot(None, session.config().include_code) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(err = %format!("{e:#}"), "plan context failed");
            observer.status(&format!("Planning failed: {e:#}"));
            return Ok(PlanOutcome::Failed {
                error: format!("{e:#}"),
            });
        }
    };
    let plan_task = session.compiler().plan_task(task)?;
    let prompt =
        session
            .compiler()
            .compile(Mode::Overview, &plan_task, session.history(), &snapshot.text)?;

    let response = match session.generate(engine, "plan", &prompt, observer) {
        Ok(response) => response,
        Err(e) => {
            warn!(err = %format!("{e:#}"), "plan generation failed");
            observer.status(&format!("Planning failed: {e:#}"));
            return Ok(PlanOutcome::Failed {
                error: format!("{e:#}"),
            });
        }
    };
    session.history_mut().push(plan_task, response.clone());

    let files = extract_plan(&response);
    if files.is_empty() {
        observer.status("Plan named no files; nothing to edit");
        return Ok(PlanOutcome::Empty);
    }
    observer.status(&format!("Plan: {}", files.join(", ")));
    Ok(PlanOutcome::Planned { files })
}

fn edit_phase<E: Engine + ?Sized>(
    session: &mut Session,
    engine: &E,
    task: &str,
    path: &str,
    position: usize,
    total: usize,
    observer: &mut dyn Observer,
) -> Result<EditOutcome> {
    let snapshot = match session.snapshot(Some(path), true) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path, err = %format!("{e:#}"), "edit context failed");
            return Ok(EditOutcome::Failed {
                error: format!("{e:#}"),
            });
        }
    };
    let edit_task = session.compiler().edit_task(task, path, position, total)?;
    let prompt = session
        .compiler()
        .compile(Mode::Edit, &edit_task, session.history(), &snapshot.text)?;

    let response = match session.generate(engine, &format!("edit-{path}"), &prompt, observer) {
        Ok(response) => response,
        Err(e) => {
            warn!(path, err = %format!("{e:#}"), "edit generation failed");
            observer.status(&format!("  failed: {e:#}"));
            return Ok(EditOutcome::Failed {
                error: format!("{e:#}"),
            });
        }
    };

    let scan = patch::scan(&response);
    if let Some((offset, reason)) = scan.aborted {
        warn!(path, offset, reason = reason.as_str(), "replacement blocks truncated");
    }
    match scan.into_records() {
        Ok(mut records) => {
            let report = apply_changes(session.workdir(), &mut records);
            observer.status(&format!("  applied {}/{}", report.applied, report.total));
            Ok(EditOutcome::Applied { report })
        }
        Err(PatchError::NotFound) => {
            warn!(path, "no replacement blocks in edit response");
            observer.status("  no replacement blocks in response");
            Ok(EditOutcome::NoChanges)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Silent;
    use crate::test_support::{Reply, ScriptedEngine, ScriptedTestRunner, TestRepo};

    fn session(repo: &TestRepo) -> Session {
        let mut config = repo.config();
        config.run_tests = true;
        config.test.command = Some("make test".to_string());
        Session::new(config).expect("session")
    }

    #[test]
    fn plans_edits_and_tests() {
        let repo = TestRepo::new()
            .with_file("x.c", "int x = 1;\n")
            .with_file("y.c", "int y = 1;\n");
        let mut session = session(&repo);
        let engine = ScriptedEngine::new([
            "FILE: x.c".to_string(),
            repo.replacement("x.c", "int x = 2;\n"),
        ]);
        let tests = ScriptedTestRunner::passing();

        let report = run_agent(&mut session, &engine, &tests, "bump x", &mut Silent).expect("agent");

        assert_eq!(report.files_planned(), 1);
        assert_eq!(report.files_edited(), 1);
        assert_eq!(report.files_applied(), 1);
        assert_eq!(repo.read("x.c"), "int x = 2;\n");
        assert!(repo.exists("x.c.bak"));
        assert!(matches!(report.tests, TestOutcome::Passed { .. }));

        let prompts = engine.prompts();
        assert!(prompts[0].contains("FILE: relative/path.ext"));
        assert!(prompts[1].contains("### File: x.c\n"));
        assert!(prompts[1].contains("<|conversation_history|>"));
    }

    #[test]
    fn empty_plan_still_runs_tests() {
        let repo = TestRepo::new().with_file("x.c", "x\n");
        let mut session = session(&repo);
        let engine = ScriptedEngine::new(["I am not sure what to change."]);
        let tests = ScriptedTestRunner::failing(1);

        let report = run_agent(&mut session, &engine, &tests, "task", &mut Silent).expect("agent");
        assert_eq!(report.plan, PlanOutcome::Empty);
        assert!(report.edits.is_empty());
        assert!(report.tests.is_failure());
        assert_eq!(tests.calls().len(), 1);
    }

    #[test]
    fn failed_edit_does_not_stop_later_files() {
        let repo = TestRepo::new().with_file("a.c", "a\n").with_file("b.c", "b\n");
        let mut session = session(&repo);
        let engine = ScriptedEngine::scripted([
            Reply::Text("FILES: a.c, b.c".to_string()),
            Reply::Fail("engine crashed".to_string()),
            Reply::Text(repo.replacement("b.c", "B\n")),
        ]);

        let report = run_agent(
            &mut session,
            &engine,
            &ScriptedTestRunner::passing(),
            "t",
            &mut Silent,
        )
        .expect("agent");

        assert!(matches!(report.edits[0].outcome, EditOutcome::Failed { .. }));
        assert!(matches!(report.edits[1].outcome, EditOutcome::Applied { .. }));
        assert_eq!(repo.read("a.c"), "a\n");
        assert_eq!(repo.read("b.c"), "B\n");
        assert_eq!(report.files_edited(), 1);
    }

    #[test]
    fn edit_without_blocks_is_no_changes() {
        let repo = TestRepo::new().with_file("a.c", "a\n");
        let mut session = session(&repo);
        let engine = ScriptedEngine::new(["FILE: a.c", "Looks fine as is."]);

        let report = run_agent(
            &mut session,
            &engine,
            &ScriptedTestRunner::passing(),
            "t",
            &mut Silent,
        )
        .expect("agent");
        assert_eq!(report.edits[0].outcome, EditOutcome::NoChanges);
        assert_eq!(report.files_applied(), 0);
        assert!(matches!(report.tests, TestOutcome::Passed { .. }));
    }

    #[test]
    fn plan_failure_is_reported() {
        let repo = TestRepo::new();
        let mut session = session(&repo);
        let engine = ScriptedEngine::failing("model missing");

        let report = run_agent(
            &mut session,
            &engine,
            &ScriptedTestRunner::passing(),
            "t",
            &mut Silent,
        )
        .expect("agent");
        let PlanOutcome::Failed { error } = &report.plan else {
            panic!("expected failed plan, got {:?}", report.plan);
        };
        assert!(error.contains("model missing"));
        assert!(report.edits.is_empty());
    }

    #[test]
    fn transcript_failure_does_not_discard_edits() {
        let repo = TestRepo::new().with_file("a.c", "a\n");
        let transcripts = repo.join("transcripts");
        let mut config = repo.config();
        config.transcript_dir = Some(transcripts.clone());
        let mut session = Session::new(config).expect("session");
        std::fs::remove_dir_all(&transcripts).expect("remove transcripts");
        let engine = ScriptedEngine::new(["FILE: a.c".to_string(), repo.replacement("a.c", "A\n")]);

        let report = run_agent(
            &mut session,
            &engine,
            &ScriptedTestRunner::passing(),
            "t",
            &mut Silent,
        )
        .expect("agent");
        assert!(matches!(report.edits[0].outcome, EditOutcome::Applied { .. }));
        assert_eq!(repo.read("a.c"), "A\n");
    }

    #[test]
    fn tests_are_skipped_unless_enabled() {
        let repo = TestRepo::new().with_file("a.c", "a\n");
        let mut config = repo.config();
        config.test.command = Some("make test".to_string());
        let mut session = Session::new(config).expect("session");
        let engine = ScriptedEngine::new(["nothing planned"]);
        let tests = ScriptedTestRunner::passing();

        let report = run_agent(&mut session, &engine, &tests, "t", &mut Silent).expect("agent");
        assert_eq!(report.tests, TestOutcome::Skipped);
        assert!(tests.calls().is_empty());
    }

    #[test]
    fn partial_apply_is_summed() {
        let repo = TestRepo::new().with_file("a.c", "a\n");
        let mut session = session(&repo);
        let response = format!(
            "{}{}",
            repo.replacement("a.c", "A\n"),
            repo.replacement("../outside.c", "x\n")
        );
        let engine = ScriptedEngine::new(["FILE: a.c".to_string(), response]);

        let report = run_agent(
            &mut session,
            &engine,
            &ScriptedTestRunner::passing(),
            "t",
            &mut Silent,
        )
        .expect("agent");
        assert_eq!((report.apply.applied, report.apply.total), (1, 2));
        assert!(report.apply.is_partial());
    }
}
