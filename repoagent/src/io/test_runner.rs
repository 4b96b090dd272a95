//! Test runner adapter: one shell command run from the workdir.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::TestOutcome;
use crate::io::config::Config;
use crate::io::process::{ProcessLimits, run_command};

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub command: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl TestRequest {
    /// Request for the configured test command, or `None` when tests are off.
    pub fn from_config(config: &Config) -> Option<Self> {
        let command = config.test_command()?;
        Some(Self {
            workdir: config.workdir.clone(),
            command: command.to_string(),
            timeout: Duration::from_secs(config.test.timeout_secs),
            output_limit_bytes: config.test.output_limit_bytes,
        })
    }
}

/// Runs a test command. Launch failures are outcomes, not errors.
pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> TestOutcome;
}

/// Runs `sh -c 'exec 2>&1; <command>'` so output arrives interleaved on one stream.
pub struct ShellTestRunner;

impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(command = %request.command, workdir = %request.workdir.display()))]
    fn run(&self, request: &TestRequest) -> TestOutcome {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec 2>&1; {}", request.command))
            .current_dir(&request.workdir);

        let limits = ProcessLimits {
            timeout: request.timeout,
            output_limit_bytes: request.output_limit_bytes,
        };
        let output = match run_command(cmd, limits, None) {
            Ok(output) => output,
            Err(e) => {
                warn!(err = %format!("{e:#}"), "test command could not be launched");
                return TestOutcome::LaunchFailed {
                    error: format!("{e:#}"),
                };
            }
        };

        let mut text = output.stdout_lossy();
        text.push_str(&output.truncation_notice());

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "tests timed out");
            return TestOutcome::Failed {
                exit_code: None,
                output: text,
                timed_out: true,
            };
        }
        if output.status.success() {
            info!("tests passed");
            TestOutcome::Passed { output: text }
        } else {
            info!(exit_code = ?output.status.code(), "tests failed");
            TestOutcome::Failed {
                exit_code: output.status.code(),
                output: text,
                timed_out: false,
            }
        }
    }
}

/// Run the configured tests, or report `Skipped`.
pub fn run_configured_tests<R: TestRunner + ?Sized>(runner: &R, config: &Config) -> TestOutcome {
    match TestRequest::from_config(config) {
        Some(request) => runner.run(&request),
        None => TestOutcome::Skipped,
    }
}
