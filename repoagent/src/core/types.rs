//! Shared deterministic types for the agent core.
//!
//! These types define stable contracts between the context builder, prompt
//! compiler, patch parser, change applier, and the controller. They must not
//! depend on external state or I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prompt mode: selects the instruction block taught to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Analysis only; no file-replacement grammar.
    #[default]
    Overview,
    /// Targeted edits expressed as replacement blocks.
    Edit,
    /// Autonomous plan-and-implement instructions.
    Agent,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Overview => "overview",
            Mode::Edit => "edit",
            Mode::Agent => "agent",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overview" => Ok(Mode::Overview),
            "edit" => Ok(Mode::Edit),
            "agent" => Ok(Mode::Agent),
            other => Err(format!(
                "unknown mode '{other}' (expected overview, edit or agent)"
            )),
        }
    }
}

/// One repository node produced by a scan. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path relative to the workdir, `/`-separated.
    pub path: String,
    /// Byte size (0 for directories).
    pub size: u64,
    pub is_dir: bool,
}

/// One proposed edit: a complete-content replacement of `path`.
///
/// `applied` is write-once: it only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    path: String,
    content: String,
    applied: bool,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            applied: false,
        }
    }

    /// Target path, relative to the workdir, exactly as the engine wrote it.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn mark_applied(&mut self) {
        self.applied = true;
    }
}

/// Result of the post-apply test phase.
///
/// `LaunchFailed` means the test command could not be started at all and is
/// reported separately from a failing suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    /// No test command configured, or tests disabled for this run.
    Skipped,
    Passed {
        output: String,
    },
    Failed {
        exit_code: Option<i32>,
        output: String,
        timed_out: bool,
    },
    LaunchFailed {
        error: String,
    },
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TestOutcome::Failed { .. } | TestOutcome::LaunchFailed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Skipped => "skipped",
            TestOutcome::Passed { .. } => "passed",
            TestOutcome::Failed { .. } => "failed",
            TestOutcome::LaunchFailed { .. } => "launch failed",
        }
    }
}
