//! Test-only fakes: scripted engine and test runner, a temp repository and a
//! recording observer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::patch::{END_MARKER, FILE_MARKER, START_MARKER, TAG_CLOSE};
use crate::core::types::TestOutcome;
use crate::io::config::Config;
use crate::io::engine::{Engine, OutputSink};
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::session::Observer;

/// One scripted engine reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

/// Engine that returns queued replies in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    replies: RefCell<VecDeque<Reply>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(responses.into_iter().map(|r| Reply::Text(r.into())))
    }

    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted([Reply::Fail(message.to_string())])
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Engine for ScriptedEngine {
    fn generate(&self, prompt: &str, on_output: Option<OutputSink<'_>>) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.replies.borrow_mut().pop_front() {
            Some(Reply::Text(text)) => {
                if let Some(sink) = on_output {
                    sink(&text);
                }
                Ok(text)
            }
            Some(Reply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted engine has no replies left")),
        }
    }
}

/// Test runner returning a fixed outcome and recording each command.
#[derive(Debug)]
pub struct ScriptedTestRunner {
    outcome: TestOutcome,
    calls: RefCell<Vec<String>>,
}

impl ScriptedTestRunner {
    pub fn new(outcome: TestOutcome) -> Self {
        Self {
            outcome,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn passing() -> Self {
        Self::new(TestOutcome::Passed {
            output: "ok\n".to_string(),
        })
    }

    pub fn failing(exit_code: i32) -> Self {
        Self::new(TestOutcome::Failed {
            exit_code: Some(exit_code),
            output: "FAIL\n".to_string(),
            timed_out: false,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> TestOutcome {
        self.calls.borrow_mut().push(request.command.clone());
        self.outcome.clone()
    }
}

/// Observer that keeps every status line and partial output.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub lines: Vec<String>,
    pub partials: Vec<String>,
}

impl Observer for RecordingObserver {
    fn status(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn partial_output(&mut self, text: &str) {
        self.partials.push(text.to_string());
    }
}

/// Temporary repository removed on drop.
pub struct TestRepo {
    dir: TempDir,
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn with_file(self, rel: &str, contents: &str) -> Self {
        self.write(rel, contents);
        self
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.join(rel)).expect("read file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.join(rel).exists()
    }

    /// Default config rooted at this repository.
    pub fn config(&self) -> Config {
        Config {
            workdir: self.dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    /// One well-formed replacement block for `rel`.
    pub fn replacement(&self, rel: &str, contents: &str) -> String {
        replacement_block(rel, contents)
    }
}

/// Render one replacement block exactly as the engine is taught to.
pub fn replacement_block(rel: &str, contents: &str) -> String {
    format!("{FILE_MARKER} {rel}{TAG_CLOSE}\n{START_MARKER}\n{contents}{END_MARKER}\n")
}
